use crate::db::schema::articles;
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::query::{self, ArticleFilter, ArticleQuery, Page};
use crate::types::*;
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::{insert_into, sql_query};
use rocket::serde::json::{json, Json, Value};
use slug::slugify;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub favorites_count: i32,
}

impl Article {
    pub fn load_by_slug(slug: &str, connection: &mut PgConnection) -> Result<Article, ApiError> {
        articles::table
            .filter(articles::slug.eq(slug))
            .order(articles::id.asc())
            .first::<Article>(connection)
            .map_err(|e| e.into())
    }

    /// Only the author may edit or delete; anyone else gets `NotFound`.
    pub fn load_owned(
        slug: &str,
        author_id: i32,
        connection: &mut PgConnection,
    ) -> Result<Article, ApiError> {
        articles::table
            .filter(articles::slug.eq(slug))
            .filter(articles::author_id.eq(author_id))
            .order(articles::id.asc())
            .first::<Article>(connection)
            .map_err(|e| e.into())
    }
}

#[derive(Insertable)]
#[diesel(table_name = articles)]
pub struct NewArticle {
    author_id: i32,
    slug: String,
    title: String,
    description: String,
    body: String,
    tag_list: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    slug: String,
    title: String,
    description: String,
    body: String,
    tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
    favorited: bool,
    favorites_count: i32,
    author: Profile<'static>,
}

impl ArticleView {
    /// `article` as seen by `viewer`, with its author's profile nested.
    pub fn project(article: Article, author: &User, viewer: Option<&User>) -> ArticleView {
        ArticleView {
            favorited: viewer.map_or(false, |viewer| viewer.has_favorited(article.id)),
            author: Profile::project(author, viewer).into_owned(),
            slug: article.slug,
            title: article.title,
            description: article.description,
            body: article.body,
            tag_list: article.tag_list,
            created_at: article.created_at,
            updated_at: article.updated_at,
            favorites_count: article.favorites_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArticleResponse {
    article: ArticleView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesResponse {
    articles: Vec<ArticleView>,
    articles_count: i64,
}

fn list_articles(
    query: &ArticleQuery,
    viewer: Option<&User>,
    connection: &mut PgConnection,
) -> ApiResult<ArticlesResponse> {
    let rows = query.load(connection)?;
    let articles_count = query.count(connection)?;
    let articles = rows
        .into_iter()
        .map(|(article, author)| ArticleView::project(article, &author, viewer))
        .collect();
    Ok(Json(ArticlesResponse {
        articles,
        articles_count,
    }))
}

#[get("/articles?<tag>&<author>&<favorited>&<limit>&<offset>")]
pub async fn list(
    viewer: Option<User>,
    connection: DbConnection,
    tag: Option<String>,
    author: Option<String>,
    favorited: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
) -> ApiResult<ArticlesResponse> {
    let page = Page::new(limit.as_deref(), offset.as_deref())?;
    connection
        .run(move |conn| {
            let mut filter = ArticleFilter {
                tag,
                ..Default::default()
            };
            if let Some(name) = author {
                filter.author_id = Some(User::load_by_name(&name, conn)?.id);
            }
            if let Some(name) = favorited {
                filter.article_ids = Some(User::load_by_name(&name, conn)?.favorites);
            }
            list_articles(&ArticleQuery::new(filter, page), viewer.as_ref(), conn)
        })
        .await
}

#[get("/articles/feed?<limit>&<offset>")]
pub async fn feed(
    current_user: CurrentUser,
    connection: DbConnection,
    limit: Option<String>,
    offset: Option<String>,
) -> ApiResult<ArticlesResponse> {
    let user = current_user?;
    let page = Page::new(limit.as_deref(), offset.as_deref())?;
    connection
        .run(move |conn| {
            let query = ArticleQuery::new(ArticleFilter::feed(user.following.clone()), page);
            list_articles(&query, Some(&user), conn)
        })
        .await
}

#[get("/articles/<slug>")]
pub async fn show(
    viewer: Option<User>,
    connection: DbConnection,
    slug: String,
) -> ApiResult<ArticleResponse> {
    connection
        .run(move |conn| {
            let (article, author) = query::article_by_slug(&slug).first::<(Article, User)>(conn)?;
            Ok(Json(ArticleResponse {
                article: ArticleView::project(article, &author, viewer.as_ref()),
            }))
        })
        .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDetails {
    title: String,
    description: String,
    body: String,
    #[serde(default)]
    tag_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateArticle {
    article: ArticleDetails,
}

impl Validate for CreateArticle {
    type Error = ValidationError;
    fn validate(self, _connection: &mut PgConnection) -> Result<Self, ValidationError> {
        non_blank(&[
            ("title", Some(&self.article.title)),
            ("description", Some(&self.article.description)),
            ("body", Some(&self.article.body)),
        ])?;
        Ok(self)
    }
}

/// Fields that are present must not be blank; absent ones are left alone.
fn non_blank(fields: &[(&str, Option<&String>)]) -> Result<(), ValidationError> {
    let mut error = ValidationError::default();
    for &(field, value) in fields {
        if value.map_or(false, |v| v.trim().is_empty()) {
            error.add_error(field, format!("empty {}", field));
        }
    }
    error.into_result()
}

/// Trims tags and drops blanks and repeats, keeping first-seen order.
fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !cleaned.iter().any(|seen| seen == tag) {
            cleaned.push(tag.to_string());
        }
    }
    cleaned
}

#[post("/articles", format = "application/json", data = "<create>")]
pub async fn create(
    user: CurrentUser,
    connection: DbConnection,
    create: Json<CreateArticle>,
) -> ApiResult<ArticleResponse> {
    let user = user?;
    connection
        .run(move |conn| {
            let create = create.validate(conn)?.into_inner().article;
            let created = Utc::now();
            let new_article = NewArticle {
                author_id: user.id,
                slug: slugify(&create.title),
                title: create.title,
                body: create.body,
                description: create.description,
                tag_list: clean_tags(create.tag_list),
                created_at: created,
                updated_at: created,
            };
            let article = insert_into(articles::table)
                .values(&new_article)
                .get_result::<Article>(conn)?;
            info!(article_id = article.id, slug = %article.slug, "created article");
            Ok(Json(ArticleResponse {
                article: ArticleView::project(article, &user, Some(&user)),
            }))
        })
        .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDetails {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    tag_list: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    article: UpdateDetails,
}

impl Validate for UpdateArticle {
    type Error = ValidationError;
    fn validate(self, _connection: &mut PgConnection) -> Result<Self, ValidationError> {
        non_blank(&[
            ("title", self.article.title.as_ref()),
            ("description", self.article.description.as_ref()),
            ("body", self.article.body.as_ref()),
        ])?;
        Ok(self)
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = articles)]
struct ArticleChanges {
    slug: Option<String>,
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    tag_list: Option<Vec<String>>,
    updated_at: DateTime<Utc>,
}

impl From<UpdateDetails> for ArticleChanges {
    fn from(details: UpdateDetails) -> ArticleChanges {
        ArticleChanges {
            slug: details.title.as_ref().map(|title| slugify(title)),
            title: details.title,
            description: details.description,
            body: details.body,
            tag_list: details.tag_list.map(clean_tags),
            updated_at: Utc::now(),
        }
    }
}

#[put("/articles/<slug>", format = "application/json", data = "<update>")]
pub async fn update(
    current_user: CurrentUser,
    connection: DbConnection,
    slug: String,
    update: Json<UpdateArticle>,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    connection
        .run(move |conn| {
            let details = update.validate(conn)?.into_inner().article;
            let article = Article::load_owned(&slug, user.id, conn)?;
            let changes = ArticleChanges::from(details);
            let article = diesel::update(&article)
                .set(&changes)
                .get_result::<Article>(conn)?;
            info!(article_id = article.id, "updated article");
            Ok(Json(ArticleResponse {
                article: ArticleView::project(article, &user, Some(&user)),
            }))
        })
        .await
}

#[delete("/articles/<slug>")]
pub async fn remove(
    current_user: CurrentUser,
    connection: DbConnection,
    slug: String,
) -> Result<Value, ApiError> {
    let user = current_user?;
    connection
        .run(move |conn| {
            let article = Article::load_owned(&slug, user.id, conn)?;
            // Comments go with the article through the foreign key cascade.
            conn.transaction::<_, ApiError, _>(|conn| {
                sql_query(
                    "UPDATE users SET favorites = array_remove(favorites, $1) \
                     WHERE $1 = ANY(favorites)",
                )
                .bind::<Integer, _>(article.id)
                .execute(conn)?;
                diesel::delete(&article).execute(conn)?;
                Ok(())
            })?;
            info!(article_id = article.id, "deleted article");
            Ok(json!({}))
        })
        .await
}

/// Flips the favorite between the caller and the article. The user's set and
/// the article's counter change in one transaction.
fn set_favorite(
    user_id: i32,
    slug: &str,
    favorite: bool,
    connection: &mut PgConnection,
) -> Result<ArticleView, ApiError> {
    connection.transaction::<_, ApiError, _>(|conn| {
        let article = Article::load_by_slug(slug, conn)?;
        let mut viewer = User::lock(user_id, conn)?;
        let delta = if favorite {
            viewer.favorite(article.id)?;
            1
        } else {
            viewer.unfavorite(article.id)?;
            -1
        };
        viewer.save_favorites(conn)?;
        let article = diesel::update(&article)
            .set(articles::favorites_count.eq(articles::favorites_count + delta))
            .get_result::<Article>(conn)?;
        let author = User::load_by_id(article.author_id, conn)?;
        info!(user_id, article_id = article.id, favorite, "changed favorite");
        Ok(ArticleView::project(article, &author, Some(&viewer)))
    })
}

#[post("/articles/<slug>/favorite")]
pub async fn favorite(
    current_user: CurrentUser,
    connection: DbConnection,
    slug: String,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    connection
        .run(move |conn| {
            let article = set_favorite(user.id, &slug, true, conn)?;
            Ok(Json(ArticleResponse { article }))
        })
        .await
}

#[delete("/articles/<slug>/favorite")]
pub async fn unfavorite(
    current_user: CurrentUser,
    connection: DbConnection,
    slug: String,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    connection
        .run(move |conn| {
            let article = set_favorite(user.id, &slug, false, conn)?;
            Ok(Json(ArticleResponse { article }))
        })
        .await
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    tags: Vec<String>,
}

#[get("/tags")]
pub async fn tags(connection: DbConnection) -> ApiResult<TagsResponse> {
    connection
        .run(|conn| {
            let tags = query::distinct_tags(conn)?;
            Ok(Json(TagsResponse { tags }))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::models::fixtures::user;
    use chrono::TimeZone;

    fn article(id: i32, author_id: i32) -> Article {
        let at = Utc.with_ymd_and_hms(2020, 4, 1, 12, 0, 0).unwrap();
        Article {
            id,
            author_id,
            slug: "hello".to_string(),
            title: "Hello".to_string(),
            description: "d".to_string(),
            body: "b".to_string(),
            tag_list: vec!["go".to_string()],
            created_at: at,
            updated_at: at,
            favorites_count: 0,
        }
    }

    #[test]
    fn slug_follows_the_title() {
        assert_eq!(slugify("Hello"), "hello");
        assert_eq!(slugify("How to train your Dragon"), "how-to-train-your-dragon");
    }

    #[test]
    fn projection_for_an_anonymous_reader() {
        let jane = user(1, "jane");
        let view = ArticleView::project(article(10, 1), &jane, None);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "slug": "hello",
                "title": "Hello",
                "description": "d",
                "body": "b",
                "tagList": ["go"],
                "createdAt": "2020-04-01T12:00:00.000Z",
                "updatedAt": "2020-04-01T12:00:00.000Z",
                "favorited": false,
                "favoritesCount": 0,
                "author": {
                    "username": "jane",
                    "bio": null,
                    "image": null,
                    "following": false,
                },
            })
        );
    }

    #[test]
    fn projection_reflects_the_viewer() {
        let jane = user(1, "jane");
        let mut bob = user(2, "bob");
        bob.follow(jane.id);
        bob.favorite(10).unwrap();

        let view = ArticleView::project(article(10, 1), &jane, Some(&bob));
        assert!(view.favorited);
        assert!(view.author.following);

        let other = ArticleView::project(article(11, 1), &jane, Some(&bob));
        assert!(!other.favorited);
    }

    #[test]
    fn tags_are_trimmed_and_unique() {
        let tags = vec![" go ", "rust", "go", "", "  "]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(clean_tags(tags), vec!["go".to_string(), "rust".to_string()]);
    }

    #[test]
    fn retitling_reslugs() {
        let changes = ArticleChanges::from(UpdateDetails {
            title: Some("A New Title".to_string()),
            description: None,
            body: None,
            tag_list: None,
        });
        assert_eq!(changes.slug.as_deref(), Some("a-new-title"));

        let untouched = ArticleChanges::from(UpdateDetails {
            title: None,
            description: Some("d2".to_string()),
            body: None,
            tag_list: None,
        });
        assert!(untouched.slug.is_none());
    }

    #[test]
    fn blank_fields_fail_validation() {
        let title = " ".to_string();
        let body = String::new();
        let description = "d".to_string();
        let err = non_blank(&[
            ("title", Some(&title)),
            ("description", Some(&description)),
            ("body", Some(&body)),
        ])
        .unwrap_err();
        assert_eq!(err.messages("title"), &["empty title".to_string()]);
        assert_eq!(err.messages("body"), &["empty body".to_string()]);
        assert!(err.messages("description").is_empty());
    }

    #[test]
    fn absent_fields_pass_validation() {
        assert!(non_blank(&[("title", None), ("body", None)]).is_ok());
    }

    #[test]
    fn create_body_uses_camel_case_tags() {
        let create: CreateArticle = serde_json::from_value(serde_json::json!({
            "article": {
                "title": "Hello",
                "description": "d",
                "body": "b",
                "tagList": ["go"],
            }
        }))
        .unwrap();
        assert_eq!(create.article.tag_list, vec!["go".to_string()]);

        let bare: CreateArticle = serde_json::from_value(serde_json::json!({
            "article": { "title": "Hello", "description": "d", "body": "b" }
        }))
        .unwrap();
        assert!(bare.article.tag_list.is_empty());
    }
}
