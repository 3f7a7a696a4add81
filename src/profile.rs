use crate::db::DbConnection;
use crate::types::*;
use crate::users::models::User;
use crate::users::CurrentUser;
use diesel::Connection;
use rocket::serde::json::Json;
use std::borrow::Cow;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ProfileResponse<'a> {
    profile: Profile<'a>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Profile<'a> {
    pub username: Cow<'a, str>,
    pub bio: Option<Cow<'a, str>>,
    pub image: Option<Cow<'a, str>>,
    pub following: bool,
}

impl<'a> Profile<'a> {
    /// `user` as seen by `viewer`. An anonymous viewer follows nobody.
    pub fn project(user: &'a User, viewer: Option<&User>) -> Profile<'a> {
        Profile {
            username: Cow::Borrowed(&user.username),
            bio: user.bio.as_ref().map(|v| Cow::Borrowed(v.as_str())),
            image: user.image.as_ref().map(|v| Cow::Borrowed(v.as_str())),
            following: viewer.map_or(false, |viewer| viewer.is_following(user.id)),
        }
    }

    pub fn into_owned(self) -> Profile<'static> {
        Profile {
            username: Cow::Owned(self.username.into_owned()),
            bio: self.bio.map(|v| Cow::Owned(v.into_owned())),
            image: self.image.map(|v| Cow::Owned(v.into_owned())),
            following: self.following,
        }
    }
}

fn respond(user: &User, viewer: Option<&User>) -> ApiResult<ProfileResponse<'static>> {
    let profile = Profile::project(user, viewer).into_owned();
    Ok(Json(ProfileResponse { profile }))
}

#[get("/profiles/<name>")]
pub async fn profile(
    viewer: Option<User>,
    connection: DbConnection,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    connection
        .run(move |conn| {
            let user = User::load_by_name(&name, conn)?;
            respond(&user, viewer.as_ref())
        })
        .await
}

#[post("/profiles/<name>/follow")]
pub async fn follow(
    current_user: CurrentUser,
    connection: DbConnection,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    let current = current_user?;
    connection
        .run(move |conn| {
            let target = User::load_by_name(&name, conn)?;
            let viewer = conn.transaction::<_, ApiError, _>(|conn| {
                let mut viewer = User::lock(current.id, conn)?;
                viewer.follow(target.id);
                viewer.save_following(conn)?;
                Ok(viewer)
            })?;
            info!(user_id = viewer.id, followed = target.id, "followed user");
            respond(&target, Some(&viewer))
        })
        .await
}

#[delete("/profiles/<name>/follow")]
pub async fn unfollow(
    current_user: CurrentUser,
    connection: DbConnection,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    let current = current_user?;
    connection
        .run(move |conn| {
            let target = User::load_by_name(&name, conn)?;
            let viewer = conn.transaction::<_, ApiError, _>(|conn| {
                let mut viewer = User::lock(current.id, conn)?;
                viewer.unfollow(target.id)?;
                viewer.save_following(conn)?;
                Ok(viewer)
            })?;
            info!(user_id = viewer.id, unfollowed = target.id, "unfollowed user");
            respond(&target, Some(&viewer))
        })
        .await
}
