use crate::article::Article;
use crate::db::schema::comments;
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::query;
use crate::types::{ApiError, ApiResult, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;
use chrono::{DateTime, Utc};
use diesel::insert_into;
use diesel::prelude::*;
use rocket::serde::json::{json, Json, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub author_id: i32,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    id: i32,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
    body: String,
    author: Profile<'static>,
}

impl CommentView {
    pub fn project(comment: Comment, author: &User, viewer: Option<&User>) -> CommentView {
        CommentView {
            id: comment.id,
            author: Profile::project(author, viewer).into_owned(),
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    article_id: i32,
    author_id: i32,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentBody {
    body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentContainer<T> {
    comment: T,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentsContainer<T> {
    comments: T,
}

#[post("/articles/<slug>/comments", data = "<details>", format = "application/json")]
pub async fn add(
    user: CurrentUser,
    conn: DbConnection,
    slug: String,
    details: Json<CommentContainer<CommentBody>>,
) -> ApiResult<CommentContainer<CommentView>> {
    let user = user?;
    let body = details.into_inner().comment.body;
    if body.trim().is_empty() {
        return Err(ValidationError::from("body", "empty body").into());
    }
    conn.run(move |conn| {
        let article = Article::load_by_slug(&slug, conn)?;
        let now = Utc::now();
        let new_comment = NewComment {
            article_id: article.id,
            author_id: user.id,
            body,
            created_at: now,
            updated_at: now,
        };

        let comment = insert_into(comments::table)
            .values(&new_comment)
            .get_result::<Comment>(conn)?;
        info!(comment_id = comment.id, article_id = article.id, "added comment");

        Ok(Json(CommentContainer {
            comment: CommentView::project(comment, &user, Some(&user)),
        }))
    })
    .await
}

#[get("/articles/<slug>/comments")]
pub async fn list(
    user: Option<User>,
    conn: DbConnection,
    slug: String,
) -> ApiResult<CommentsContainer<Vec<CommentView>>> {
    conn.run(move |conn| {
        let article = Article::load_by_slug(&slug, conn)?;
        let data = query::comments_for(article.id).load::<(Comment, User)>(conn)?;
        let comments = data
            .into_iter()
            .map(|(comment, author)| CommentView::project(comment, &author, user.as_ref()))
            .collect();
        Ok(Json(CommentsContainer { comments }))
    })
    .await
}

#[delete("/articles/<slug>/comments/<id>")]
pub async fn remove(
    user: CurrentUser,
    conn: DbConnection,
    slug: String,
    id: i32,
) -> Result<Value, ApiError> {
    let user = user?;
    conn.run(move |conn| {
        let article = Article::load_by_slug(&slug, conn)?;
        // Someone else's comment, or one on another article, is not found.
        let deleted = diesel::delete(
            comments::table
                .filter(comments::id.eq(id))
                .filter(comments::article_id.eq(article.id))
                .filter(comments::author_id.eq(user.id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(ApiError::NotFound);
        }
        info!(comment_id = id, "deleted comment");
        Ok(json!({}))
    })
    .await
}
