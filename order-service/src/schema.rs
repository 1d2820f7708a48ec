diesel::table! {
    order_items (order_id, position) {
        order_id -> Uuid,
        position -> Int4,
        product_id -> Uuid,
        quantity -> Int4,
        price -> Numeric,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        buyer_id -> Uuid,
        total -> Numeric,
        status -> Varchar,
        payment_reference -> Int8,
        payment_link_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        is_infinite_stock -> Nullable<Bool>,
        stock -> Nullable<Int4>,
        product_type -> Varchar,
        payload_text -> Nullable<Text>,
        payload_filename -> Nullable<Varchar>,
        payload_filesize -> Nullable<Int8>,
        review_count -> Int4,
        rating_total -> Int8,
        star_1 -> Int4,
        star_2 -> Int4,
        star_3 -> Int4,
        star_4 -> Int4,
        star_5 -> Int4,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    reviews (id) {
        id -> Uuid,
        product_id -> Uuid,
        user_id -> Uuid,
        rating -> Int2,
        comment -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sessions (token) {
        token -> Varchar,
        user_id -> Uuid,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    tenants (id) {
        id -> Uuid,
        name -> Varchar,
        slug -> Varchar,
        payos_client_id -> Nullable<Varchar>,
        payos_api_key -> Nullable<Varchar>,
        payos_checksum_key -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_items -> products (product_id));
diesel::joinable!(sessions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    order_items,
    orders,
    products,
    reviews,
    sessions,
    tenants,
    users,
);
