//! Article and comment listings joined with their authors.
//!
//! Every listing is built the same way: filter, inner join the author (rows
//! whose author is gone drop out), order, then paginate. The total for a
//! listing is a second query over the same filter, so under concurrent writes
//! the count and the page may disagree.

use crate::article::Article;
use crate::db::schema::{articles, comments, users};
use crate::types::ValidationError;
use crate::users::models::User;
use diesel::helper_types::{InnerJoin, IntoBoxed};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::Text;

pub const DEFAULT_LIMIT: i64 = 20;

type ArticleRows = IntoBoxed<'static, InnerJoin<articles::table, users::table>, Pg>;
type CommentRows = IntoBoxed<'static, InnerJoin<comments::table, users::table>, Pg>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Page {
        Page {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Client supplied paging, straight from the query string. Missing values
    /// take the defaults; there is no upper bound on the limit.
    pub fn new(limit: Option<&str>, offset: Option<&str>) -> Result<Page, ValidationError> {
        let mut errors = ValidationError::default();
        let page = Page {
            limit: paging_value("limit", limit, DEFAULT_LIMIT, &mut errors),
            offset: paging_value("offset", offset, 0, &mut errors),
        };
        errors.into_result().map(|_| page)
    }
}

fn paging_value(
    field: &str,
    raw: Option<&str>,
    default: i64,
    errors: &mut ValidationError,
) -> i64 {
    match raw.map(|value| value.trim().parse::<i64>()) {
        None => default,
        Some(Ok(value)) if value >= 0 => value,
        Some(Ok(_)) => {
            errors.add_error(field, "must not be negative");
            default
        }
        Some(Err(_)) => {
            errors.add_error(field, "must be an integer");
            default
        }
    }
}

/// Conditions on an article listing, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleFilter {
    pub author_id: Option<i32>,
    pub author_ids: Option<Vec<i32>>,
    pub tag: Option<String>,
    pub article_ids: Option<Vec<i32>>,
}

impl ArticleFilter {
    /// Articles written by anyone in `following`.
    pub fn feed(following: Vec<i32>) -> ArticleFilter {
        ArticleFilter {
            author_ids: Some(following),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArticleQuery {
    filter: ArticleFilter,
    page: Page,
}

impl ArticleQuery {
    pub fn new(filter: ArticleFilter, page: Page) -> ArticleQuery {
        ArticleQuery { filter, page }
    }

    fn filtered(&self) -> ArticleRows {
        let mut query = articles::table.inner_join(users::table).into_boxed();
        if let Some(author_id) = self.filter.author_id {
            query = query.filter(articles::author_id.eq(author_id));
        }
        if let Some(ref author_ids) = self.filter.author_ids {
            query = query.filter(articles::author_id.eq_any(author_ids.clone()));
        }
        if let Some(ref tag) = self.filter.tag {
            query = query.filter(articles::tag_list.contains(vec![tag.clone()]));
        }
        if let Some(ref article_ids) = self.filter.article_ids {
            query = query.filter(articles::id.eq_any(article_ids.clone()));
        }
        query
    }

    /// Newest first; the id breaks ties so pages never overlap.
    pub fn rows(&self) -> ArticleRows {
        self.filtered()
            .order((articles::created_at.desc(), articles::id.desc()))
            .offset(self.page.offset)
            .limit(self.page.limit)
    }

    pub fn load(&self, connection: &mut PgConnection) -> QueryResult<Vec<(Article, User)>> {
        self.rows().load(connection)
    }

    pub fn count(&self, connection: &mut PgConnection) -> QueryResult<i64> {
        self.filtered().count().get_result(connection)
    }
}

pub fn article_by_slug(slug: &str) -> ArticleRows {
    articles::table
        .inner_join(users::table)
        .into_boxed()
        .filter(articles::slug.eq(slug.to_string()))
        .order(articles::id.asc())
}

/// Comments on one article with their authors, oldest first.
pub fn comments_for(article_id: i32) -> CommentRows {
    comments::table
        .inner_join(users::table)
        .into_boxed()
        .filter(comments::article_id.eq(article_id))
        .order((comments::created_at.asc(), comments::id.asc()))
}

#[derive(QueryableByName)]
struct TagRow {
    #[diesel(sql_type = Text)]
    tag: String,
}

/// Every tag used by at least one article, alphabetically.
pub fn distinct_tags(connection: &mut PgConnection) -> QueryResult<Vec<String>> {
    let rows = sql_query("SELECT DISTINCT unnest(tag_list) AS tag FROM articles ORDER BY tag")
        .load::<TagRow>(connection)?;
    Ok(rows.into_iter().map(|row| row.tag).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use rstest::rstest;

    fn sql(query: &ArticleQuery) -> String {
        debug_query::<Pg, _>(&query.rows()).to_string()
    }

    fn position(sql: &str, needle: &str) -> usize {
        sql.find(needle)
            .unwrap_or_else(|| panic!("{:?} not found in {}", needle, sql))
    }

    #[test]
    fn default_page() {
        assert_eq!(Page::new(None, None).unwrap(), Page { limit: 20, offset: 0 });
        assert_eq!(Page::new(Some("500"), Some("40")).unwrap(), Page { limit: 500, offset: 40 });
        assert_eq!(Page::new(Some("0"), None).unwrap(), Page { limit: 0, offset: 0 });
    }

    #[rstest]
    #[case(Some("-1"), None, "limit", "must not be negative")]
    #[case(None, Some("-5"), "offset", "must not be negative")]
    #[case(Some("abc"), None, "limit", "must be an integer")]
    #[case(None, Some("xyz"), "offset", "must be an integer")]
    #[case(Some(""), None, "limit", "must be an integer")]
    #[case(Some("2.5"), None, "limit", "must be an integer")]
    fn bad_paging_is_rejected(
        #[case] limit: Option<&str>,
        #[case] offset: Option<&str>,
        #[case] field: &str,
        #[case] message: &str,
    ) {
        let err = Page::new(limit, offset).unwrap_err();
        assert_eq!(err.messages(field), &[message.to_string()]);
    }

    #[test]
    fn both_bad_values_are_reported() {
        let err = Page::new(Some("abc"), Some("xyz")).unwrap_err();
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn stages_run_filter_join_then_paginate() {
        let query = ArticleQuery::new(
            ArticleFilter {
                tag: Some("go".to_string()),
                ..Default::default()
            },
            Page { limit: 2, offset: 0 },
        );
        let sql = sql(&query);

        let join = position(&sql, "INNER JOIN \"users\"");
        let filter = position(&sql, "\"articles\".\"tag_list\" @>");
        let order = position(&sql, "ORDER BY");
        let limit = position(&sql, "LIMIT");
        let offset = position(&sql, "OFFSET");
        assert!(join < filter && filter < order && order < limit && limit < offset);
    }

    #[test]
    fn unfiltered_listing_has_no_where_clause() {
        let sql = sql(&ArticleQuery::new(ArticleFilter::default(), Page::default()));
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("LIMIT"));
    }

    #[test]
    fn filters_combine_with_and() {
        let query = ArticleQuery::new(
            ArticleFilter {
                author_id: Some(1),
                tag: Some("rust".to_string()),
                article_ids: Some(vec![3, 4]),
                ..Default::default()
            },
            Page::default(),
        );
        let sql = sql(&query);
        assert!(sql.contains("\"articles\".\"author_id\" ="));
        assert!(sql.contains("\"articles\".\"tag_list\" @>"));
        assert!(sql.contains("\"articles\".\"id\" = ANY("));
        assert_eq!(sql.matches(" AND ").count(), 2);
    }

    #[test]
    fn feed_restricts_to_followed_authors() {
        let query = ArticleQuery::new(ArticleFilter::feed(vec![7, 8]), Page::default());
        assert!(sql(&query).contains("\"articles\".\"author_id\" = ANY("));
    }

    #[test]
    fn count_uses_the_same_filter_without_paging() {
        let query = ArticleQuery::new(
            ArticleFilter {
                tag: Some("go".to_string()),
                ..Default::default()
            },
            Page { limit: 2, offset: 4 },
        );
        let sql = debug_query::<Pg, _>(&query.filtered().count()).to_string();
        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains("\"articles\".\"tag_list\" @>"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn comments_filter_by_article_only() {
        let sql = debug_query::<Pg, _>(&comments_for(9)).to_string();
        assert!(sql.contains("INNER JOIN \"users\""));
        assert!(sql.contains("\"comments\".\"article_id\" ="));
        assert!(!sql.contains("LIMIT"));
    }
}
