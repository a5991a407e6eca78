use indoc::indoc;

use super::QueueMigration;

pub const M000002_MIGRATION: QueueMigration = QueueMigration {
    name: "m000002",
    is_breaking: false,
    stmts: &[indoc! {r#"
        insert or ignore into config (key, value) values
            ('max_retries', '3'),
            ('backoff_base', '2'),
            ('job_timeout_ms', '60000');
    "#}],
};
