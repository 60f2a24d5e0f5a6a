// Esquema Diesel para SQLite.
// Tablas: jobs (cola de trabajo), job_events (log append-only de completados)
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    jobs (id) {
        id -> Text,
        queue_name -> Text,
        payload -> Text,
        status -> Text,
        attempts -> Integer,
        max_attempts -> Integer,
        last_error -> Nullable<Text>,
        created_at -> BigInt,
        updated_at -> BigInt,
        lease_until -> BigInt,
    }
}
diesel::table! {
    job_events (seq) {
        seq -> Integer,
        queue_name -> Text,
        job_id -> Text,
        payload -> Text,
        status -> Text,
        created_at -> BigInt,
    }
}
allow_tables_to_appear_in_same_query!(jobs, job_events);
