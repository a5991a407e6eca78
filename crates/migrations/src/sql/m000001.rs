use indoc::indoc;

use super::QueueMigration;

pub const M000001_MIGRATION: QueueMigration = QueueMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table if not exists jobs (
                id text primary key,
                command text not null check (length(trim(command)) > 0),
                state text not null default 'pending'
                    check (state in ('pending', 'processing', 'completed', 'dead')),
                attempts integer not null default 0 check (attempts >= 0),
                max_retries integer not null default 3 check (max_retries >= 1),
                backoff_base integer not null default 2 check (backoff_base >= 1),
                priority integer not null default 0,
                run_at text,
                next_run_at text,
                locked_by text,
                locked_at text,
                created_at text not null,
                updated_at text not null,
                check (state != 'processing' or locked_by is not null)
            );
        "#},
        indoc! {r#"
            create index if not exists jobs_claim_idx
                on jobs (state, priority desc, created_at);
        "#},
        indoc! {r#"
            create table if not exists dlq (
                id text primary key,
                command text not null,
                attempts integer not null,
                max_retries integer not null,
                reason text not null,
                failed_at text not null
            );
        "#},
        indoc! {r#"
            create table if not exists logs (
                id integer primary key autoincrement,
                job_id text not null,
                started_at text not null,
                finished_at text not null,
                exit_code integer not null,
                stdout text not null default '',
                stderr text not null default ''
            );
        "#},
        indoc! {r#"
            create index if not exists logs_job_id_idx on logs (job_id, id);
        "#},
        indoc! {r#"
            create table if not exists config (
                key text primary key,
                value text not null
            );
        "#},
    ],
};
