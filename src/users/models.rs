use crate::db::schema::users;
use crate::types::ApiError;
use diesel::prelude::*;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub following: Vec<i32>,
    pub favorites: Vec<i32>,
}

impl User {
    pub fn load_by_id(user_id: i32, connection: &mut PgConnection) -> Result<User, ApiError> {
        users::table
            .find(user_id)
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    /// Re-reads the row with a row lock. Relationship mutations go through
    /// this inside a transaction so concurrent writers cannot lose updates.
    pub fn lock(user_id: i32, connection: &mut PgConnection) -> Result<User, ApiError> {
        users::table
            .find(user_id)
            .for_update()
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn load_by_name(name: &str, connection: &mut PgConnection) -> Result<User, ApiError> {
        users::table
            .filter(users::username.eq(name))
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn find_by_email(
        address: &str,
        connection: &mut PgConnection,
    ) -> Result<Option<User>, ApiError> {
        users::table
            .filter(users::email.eq(address))
            .get_result::<User>(connection)
            .optional()
            .map_err(|e| e.into())
    }

    pub fn save_following(&self, connection: &mut PgConnection) -> Result<(), ApiError> {
        diesel::update(self)
            .set(users::following.eq(&self.following))
            .execute(connection)?;
        Ok(())
    }

    pub fn save_favorites(&self, connection: &mut PgConnection) -> Result<(), ApiError> {
        diesel::update(self)
            .set(users::favorites.eq(&self.favorites))
            .execute(connection)?;
        Ok(())
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Profile fields a user may change about themselves. `None` leaves the
/// column untouched.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub bio: Option<String>,
    pub image: Option<String>,
}

impl ProfileChanges {
    // Diesel refuses an UPDATE without columns.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password_hash.is_none()
            && self.bio.is_none()
            && self.image.is_none()
    }
}

/// The authenticated user's own record as returned by the user endpoints.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub email: String,
    pub token: String,
    pub username: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

impl UserView {
    pub fn new(user: User, token: String) -> UserView {
        UserView {
            email: user.email,
            token,
            username: user.username,
            bio: user.bio,
            image: user.image,
        }
    }
}
