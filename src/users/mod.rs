use crate::auth::{bearer_token, password, Tokens};
use crate::db::schema::users;
use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};
use diesel::insert_into;
use diesel::prelude::*;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest};
use rocket::serde::json::Json;
use rocket::{Request, State};
use tracing::{debug, info};

pub mod models;
pub mod relations;
mod utils;

use self::models::{NewUser, ProfileChanges, User, UserView};
use self::utils::*;

/// Guard for endpoints that require a session. Endpoints where a session is
/// optional take `Option<User>` instead. Either one goes before `DbConnection`
/// in a handler's arguments: the guard checks out and returns its own
/// connection, so it must not run while the handler's is held.
pub type CurrentUser = Result<User, ApiError>;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    user: UserView,
}

#[derive(Debug, Deserialize)]
struct RegistrationDetails {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    user: RegistrationDetails,
}

impl Validate for Registration {
    type Error = ApiError;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error> {
        let mut errors = ValidationError::default();

        if let Err(e) = validate_email_re(&self.user.email) {
            errors.merge(e);
        } else if email_taken(&self.user.email, None, connection)? {
            errors.add_error("email", "Email already exists");
        }

        if let Err(e) = validate_username_re(&self.user.username) {
            errors.merge(e);
        } else if username_taken(&self.user.username, None, connection)? {
            errors.add_error("username", "Username already exists");
        }

        if let Err(e) = validate_password(&self.user.password) {
            errors.merge(e);
        }

        errors.into_result()?;
        Ok(self)
    }
}

#[post("/users", format = "application/json", data = "<registration>")]
pub async fn register(
    connection: DbConnection,
    tokens: &State<Tokens>,
    registration: Json<Registration>,
) -> ApiResult<UserResponse> {
    let tokens = tokens.inner().clone();
    connection
        .run(move |conn| {
            let registration = registration.validate(conn)?.into_inner();
            let new_user = NewUser {
                username: registration.user.username,
                email: registration.user.email,
                password_hash: password::hash(&registration.user.password)?,
            };

            let user = insert_into(users::table)
                .values(&new_user)
                .get_result::<User>(conn)?;
            info!(user_id = user.id, "registered user");
            let token = tokens.issue(user.id)?;
            Ok(Json(UserResponse {
                user: UserView::new(user, token),
            }))
        })
        .await
}

#[derive(Debug, Deserialize)]
struct LoginDetails {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    user: LoginDetails,
}

#[post("/users/login", format = "application/json", data = "<login>")]
pub async fn login(
    connection: DbConnection,
    tokens: &State<Tokens>,
    login: Json<Login>,
) -> ApiResult<UserResponse> {
    let tokens = tokens.inner().clone();
    let login = login.into_inner().user;
    connection
        .run(move |conn| {
            let user = match User::find_by_email(&login.email, conn)? {
                Some(user) => user,
                None => return Err(invalid_credentials()),
            };
            if !password::verify(&user.password_hash, &login.password)? {
                debug!(user_id = user.id, "rejected login");
                return Err(invalid_credentials());
            }
            let token = tokens.issue(user.id)?;
            Ok(Json(UserResponse {
                user: UserView::new(user, token),
            }))
        })
        .await
}

// Unknown email and wrong password look the same to the caller.
fn invalid_credentials() -> ApiError {
    ValidationError::from("email or password", "is invalid").into()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let tokens = match request.rocket().state::<Tokens>() {
            Some(tokens) => tokens,
            None => return Outcome::Error((Status::InternalServerError, ApiError::Internal)),
        };
        let header = request.headers().get_one("Authorization");
        let claims = match bearer_token(header).and_then(|token| tokens.verify(token)) {
            Ok(claims) => claims,
            Err(_) => {
                debug!(uri = %request.uri(), "missing or invalid session token");
                return Outcome::Error((Status::Unauthorized, ApiError::Unauthorized));
            }
        };

        let connection = match request.guard::<DbConnection>().await {
            Outcome::Success(connection) => connection,
            Outcome::Error(failure) => return Outcome::Error(failure),
            Outcome::Forward(status) => return Outcome::Forward(status),
        };
        let user_id = claims.user_id;
        match connection.run(move |conn| User::load_by_id(user_id, conn)).await {
            Ok(user) => Outcome::Success(user),
            // A valid token for a user that no longer exists.
            Err(ApiError::NotFound) => {
                Outcome::Error((Status::Unauthorized, ApiError::Unauthorized))
            }
            Err(e) => Outcome::Error((e.status(), e)),
        }
    }
}

#[get("/user")]
pub fn current(user: CurrentUser, tokens: &State<Tokens>) -> ApiResult<UserResponse> {
    let user = user?;
    let token = tokens.issue(user.id)?;
    Ok(Json(UserResponse {
        user: UserView::new(user, token),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

#[put("/user", format = "application/json", data = "<update>")]
pub async fn update(
    current_user: CurrentUser,
    connection: DbConnection,
    tokens: &State<Tokens>,
    update: Json<Update>,
) -> ApiResult<UserResponse> {
    let user = current_user?;
    let tokens = tokens.inner().clone();
    let update = update.into_inner().user;
    connection
        .run(move |conn| {
            let changes = profile_changes(&user, update, conn)?;
            let user = if changes.is_empty() {
                user
            } else {
                diesel::update(&user).set(&changes).get_result::<User>(conn)?
            };
            info!(user_id = user.id, "updated user");
            let token = tokens.issue(user.id)?;
            Ok(Json(UserResponse {
                user: UserView::new(user, token),
            }))
        })
        .await
}

fn profile_changes(
    user: &User,
    update: UpdateUser,
    connection: &mut PgConnection,
) -> Result<ProfileChanges, ApiError> {
    let mut error = ValidationError::default();
    let mut changes = ProfileChanges {
        bio: update.bio,
        image: update.image,
        ..Default::default()
    };

    if let Some(new_email) = update.email {
        if let Err(e) = validate_email_re(&new_email) {
            error.merge(e);
        } else if email_taken(&new_email, Some(user.id), connection)? {
            error.add_error("email", format!("Email already chosen: {}", new_email));
        } else {
            changes.email = Some(new_email);
        }
    }

    if let Some(new_username) = update.username {
        if let Err(e) = validate_username_re(&new_username) {
            error.merge(e);
        } else if username_taken(&new_username, Some(user.id), connection)? {
            error.add_error(
                "username",
                format!("Username already chosen: {}", new_username),
            );
        } else {
            changes.username = Some(new_username);
        }
    }

    if let Some(new_password) = update.password {
        match validate_password(&new_password) {
            Err(e) => error.merge(e),
            Ok(_) => changes.password_hash = Some(password::hash(&new_password)?),
        }
    }

    error.into_result()?;
    Ok(changes)
}
