use openlcs_migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, Statement};
use test_log::test;

async fn tables(db: &sea_orm::DatabaseConnection) -> Result<Vec<String>, anyhow::Error> {
    let rows = db
        .query_all(Statement::from_string(
            db.get_database_backend(),
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'seaql_%' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        ))
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| row.try_get_by_index::<String>(0))
        .collect::<Result<_, _>>()?)
}

#[test(tokio::test)]
async fn up_down_up() -> Result<(), anyhow::Error> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("db.sqlite").display());
    let db = Database::connect(url).await?;

    Migrator::up(&db, None).await?;
    assert_eq!(
        tables(&db).await?,
        vec![
            "component",
            "component_node",
            "copyright_detection",
            "file",
            "file_scan",
            "license_detection",
            "path",
            "source",
            "task",
            "task_lock",
            "task_result",
        ]
    );

    Migrator::down(&db, None).await?;
    assert!(tables(&db).await?.is_empty());

    Migrator::up(&db, None).await?;
    assert_eq!(tables(&db).await?.len(), 11);

    Ok(())
}
