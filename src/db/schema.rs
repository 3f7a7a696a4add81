table! {
    articles (id) {
        id -> Int4,
        author_id -> Int4,
        slug -> Text,
        title -> Text,
        description -> Text,
        body -> Text,
        tag_list -> Array<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        favorites_count -> Int4,
    }
}

table! {
    comments (id) {
        id -> Int4,
        article_id -> Int4,
        author_id -> Int4,
        body -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    users (id) {
        id -> Int4,
        username -> Text,
        email -> Text,
        password_hash -> Text,
        bio -> Nullable<Text>,
        image -> Nullable<Text>,
        following -> Array<Int4>,
        favorites -> Array<Int4>,
    }
}

joinable!(articles -> users (author_id));
joinable!(comments -> users (author_id));
joinable!(comments -> articles (article_id));

allow_tables_to_appear_in_same_query!(articles, comments, users);
