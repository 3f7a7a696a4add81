use super::models::User;
use crate::types::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationError {
    NotFollowing,
    AlreadyFavorited,
    NotFavorited,
}

impl From<RelationError> for ApiError {
    fn from(err: RelationError) -> ApiError {
        match err {
            RelationError::NotFollowing => ApiError::Conflict("user is not followed"),
            RelationError::AlreadyFavorited => ApiError::Conflict("article already favorited"),
            RelationError::NotFavorited => ApiError::Conflict("article is not favorited"),
        }
    }
}

// The sets are kept as plain vectors because they are stored as Postgres
// arrays and written back whole. Every mutation keeps them duplicate free.
impl User {
    pub fn is_following(&self, user_id: i32) -> bool {
        self.following.contains(&user_id)
    }

    pub fn has_favorited(&self, article_id: i32) -> bool {
        self.favorites.contains(&article_id)
    }

    /// Following someone twice is a no-op.
    pub fn follow(&mut self, user_id: i32) {
        if !self.is_following(user_id) {
            self.following.push(user_id);
        }
    }

    pub fn unfollow(&mut self, user_id: i32) -> Result<(), RelationError> {
        match self.following.iter().position(|&id| id == user_id) {
            Some(index) => {
                self.following.remove(index);
                Ok(())
            }
            None => Err(RelationError::NotFollowing),
        }
    }

    pub fn favorite(&mut self, article_id: i32) -> Result<(), RelationError> {
        if self.has_favorited(article_id) {
            return Err(RelationError::AlreadyFavorited);
        }
        self.favorites.push(article_id);
        Ok(())
    }

    pub fn unfavorite(&mut self, article_id: i32) -> Result<(), RelationError> {
        match self.favorites.iter().position(|&id| id == article_id) {
            Some(index) => {
                self.favorites.remove(index);
                Ok(())
            }
            None => Err(RelationError::NotFavorited),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::models::fixtures::user;

    #[test]
    fn follow_is_idempotent() {
        let mut jane = user(1, "jane");
        jane.follow(2);
        jane.follow(2);
        assert_eq!(jane.following, vec![2]);
        assert!(jane.is_following(2));
    }

    #[test]
    fn unfollow_requires_a_follow() {
        let mut jane = user(1, "jane");
        assert_eq!(jane.unfollow(2), Err(RelationError::NotFollowing));

        jane.follow(2);
        jane.follow(3);
        assert_eq!(jane.unfollow(2), Ok(()));
        assert_eq!(jane.following, vec![3]);
        assert_eq!(jane.unfollow(2), Err(RelationError::NotFollowing));
    }

    #[test]
    fn favorite_twice_conflicts() {
        let mut jane = user(1, "jane");
        assert_eq!(jane.favorite(10), Ok(()));
        assert_eq!(jane.favorite(10), Err(RelationError::AlreadyFavorited));
        assert_eq!(jane.favorites, vec![10]);
    }

    #[test]
    fn unfavorite_requires_a_favorite() {
        let mut jane = user(1, "jane");
        assert_eq!(jane.unfavorite(10), Err(RelationError::NotFavorited));

        jane.favorite(10).unwrap();
        assert_eq!(jane.unfavorite(10), Ok(()));
        assert!(!jane.has_favorited(10));
    }

    #[test]
    fn relation_errors_are_conflicts() {
        let err: ApiError = RelationError::AlreadyFavorited.into();
        assert_eq!(err.status().code, 409);
        assert_eq!(err.message(), "article already favorited");
    }
}
