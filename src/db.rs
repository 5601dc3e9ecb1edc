use sqlx::MySqlPool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id               VARCHAR(64)  NOT NULL PRIMARY KEY,
        team_name        VARCHAR(255) NOT NULL,
        team_name_lower  VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL,
        college_name     VARCHAR(255) NOT NULL DEFAULT '',
        leader           JSON NULL,
        members          JSON NOT NULL,
        track            VARCHAR(255) NOT NULL DEFAULT '',
        project_title    VARCHAR(512) NOT NULL DEFAULT '',
        qr_token         VARCHAR(128) NULL,
        qr_generated_at  DATETIME(6) NULL,
        roster           JSON NOT NULL,
        checked_in       BOOLEAN NOT NULL DEFAULT FALSE,
        marked_by_uid    VARCHAR(128) NULL,
        marked_by_name   VARCHAR(255) NULL,
        marked_at        DATETIME(6) NULL,
        attendance_round VARCHAR(64) NULL,
        locked           BOOLEAN NOT NULL DEFAULT FALSE,
        version          BIGINT UNSIGNED NOT NULL DEFAULT 0,
        created_at       DATETIME(6) NOT NULL,
        last_modified    DATETIME(6) NOT NULL,
        INDEX idx_teams_name_lower (team_name_lower, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attendance_records (
        team_id          VARCHAR(64) NOT NULL,
        seq              BIGINT UNSIGNED NOT NULL,
        present_count    INT UNSIGNED NOT NULL,
        absent_count     INT UNSIGNED NOT NULL,
        status           VARCHAR(16) NOT NULL,
        roster           JSON NOT NULL,
        marked_by_uid    VARCHAR(128) NOT NULL,
        marked_by_name   VARCHAR(255) NOT NULL,
        marked_at        DATETIME(6) NOT NULL,
        attendance_round VARCHAR(64) NOT NULL,
        PRIMARY KEY (team_id, seq),
        CONSTRAINT fk_records_team FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        id                 TINYINT UNSIGNED NOT NULL PRIMARY KEY,
        attendance_enabled BOOLEAN NOT NULL,
        current_session    VARCHAR(64) NOT NULL,
        sessions           JSON NOT NULL,
        last_modified      DATETIME(6) NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        uid        VARCHAR(128) NOT NULL PRIMARY KEY,
        name       VARCHAR(255) NOT NULL,
        email      VARCHAR(255) NOT NULL DEFAULT '',
        role       VARCHAR(16)  NOT NULL,
        approved   BOOLEAN NOT NULL DEFAULT FALSE,
        created_at DATETIME(6) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        seq         BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        id          VARCHAR(64)  NOT NULL UNIQUE,
        message     VARCHAR(1000) NOT NULL,
        kind        VARCHAR(32)  NOT NULL,
        sent_by     VARCHAR(255) NOT NULL,
        sent_by_uid VARCHAR(128) NOT NULL,
        created_at  DATETIME(6)  NOT NULL,
        INDEX idx_notifications_created (created_at)
    )
    "#,
];

pub async fn init_db(database_url: &str) -> Result<MySqlPool, sqlx::Error> {
    let pool = MySqlPool::connect(database_url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Create the collections if they don't exist yet.
async fn migrate(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(tables = SCHEMA.len(), "Schema ready");
    Ok(())
}
