use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Source::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Source::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Source::Checksum)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Source::ArchiveType).string().not_null())
                    .col(ColumnDef::new(Source::Name).string().not_null())
                    .col(
                        ColumnDef::new(Source::ScanFlag)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Source::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(File::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(File::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(File::Swhid).string().not_null().unique_key())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Path::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Path::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Path::SourceId).uuid().not_null())
                    .col(ColumnDef::new(Path::FileId).uuid().not_null())
                    .col(ColumnDef::new(Path::Path).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Path::Table, Path::SourceId)
                            .to(Source::Table, Source::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Path::Table, Path::FileId)
                            .to(File::Table, File::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Indexes::PathSourcePath.to_string())
                    .table(Path::Table)
                    .col(Path::SourceId)
                    .col(Path::Path)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FileScan::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(FileScan::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(FileScan::FileId).uuid().not_null())
                    .col(ColumnDef::new(FileScan::Detector).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(FileScan::Table, FileScan::FileId)
                            .to(File::Table, File::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Indexes::FileScanFileDetector.to_string())
                    .table(FileScan::Table)
                    .col(FileScan::FileId)
                    .col(FileScan::Detector)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LicenseDetection::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LicenseDetection::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LicenseDetection::ScanId).uuid().not_null())
                    .col(
                        ColumnDef::new(LicenseDetection::LicenseKey)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LicenseDetection::Score).double().not_null())
                    .col(
                        ColumnDef::new(LicenseDetection::StartLine)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LicenseDetection::EndLine)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LicenseDetection::FalsePositive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(LicenseDetection::Table, LicenseDetection::ScanId)
                            .to(FileScan::Table, FileScan::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Indexes::LicenseDetectionUnique.to_string())
                    .table(LicenseDetection::Table)
                    .col(LicenseDetection::ScanId)
                    .col(LicenseDetection::LicenseKey)
                    .col(LicenseDetection::Score)
                    .col(LicenseDetection::StartLine)
                    .col(LicenseDetection::EndLine)
                    .col(LicenseDetection::FalsePositive)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CopyrightDetection::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CopyrightDetection::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CopyrightDetection::ScanId).uuid().not_null())
                    .col(
                        ColumnDef::new(CopyrightDetection::Statement)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CopyrightDetection::StartLine)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CopyrightDetection::EndLine)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CopyrightDetection::FalsePositive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(CopyrightDetection::Table, CopyrightDetection::ScanId)
                            .to(FileScan::Table, FileScan::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Indexes::CopyrightDetectionUnique.to_string())
                    .table(CopyrightDetection::Table)
                    .col(CopyrightDetection::ScanId)
                    .col(CopyrightDetection::Statement)
                    .col(CopyrightDetection::StartLine)
                    .col(CopyrightDetection::EndLine)
                    .col(CopyrightDetection::FalsePositive)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Component::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Component::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Component::Kind).string().not_null())
                    .col(ColumnDef::new(Component::Name).string().not_null())
                    .col(ColumnDef::new(Component::Version).string().not_null())
                    .col(ColumnDef::new(Component::Release).string().not_null())
                    .col(ColumnDef::new(Component::Arch).string().not_null())
                    .col(ColumnDef::new(Component::License).text())
                    .col(ColumnDef::new(Component::Purl).text().not_null().unique_key())
                    .col(ColumnDef::new(Component::SourceId).uuid().unique_key())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Component::Table, Component::SourceId)
                            .to(Source::Table, Source::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ComponentNode::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ComponentNode::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ComponentNode::ComponentId).uuid().not_null())
                    .col(ColumnDef::new(ComponentNode::ParentId).uuid())
                    .foreign_key(
                        ForeignKey::create()
                            .from(ComponentNode::Table, ComponentNode::ComponentId)
                            .to(Component::Table, Component::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ComponentNode::Table, ComponentNode::ParentId)
                            .to(ComponentNode::Table, ComponentNode::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Indexes::ComponentNodeParent.to_string())
                    .table(ComponentNode::Table)
                    .col(ComponentNode::ComponentId)
                    .col(ComponentNode::ParentId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // NULL parents are distinct for the index above, a component has a single root
        manager
            .get_connection()
            .execute_unprepared(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}) WHERE {} IS NULL",
                Indexes::ComponentNodeRoot.to_string(),
                ComponentNode::Table.to_string(),
                ComponentNode::ComponentId.to_string(),
                ComponentNode::ParentId.to_string(),
            ))
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TaskResult::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TaskResult::ExecutionId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TaskResult::TaskName).string().not_null())
                    .col(ColumnDef::new(TaskResult::Args).json_binary().not_null())
                    .col(ColumnDef::new(TaskResult::Kwargs).json_binary().not_null())
                    .col(ColumnDef::new(TaskResult::Status).string_len(16).not_null())
                    .col(ColumnDef::new(TaskResult::Queue).string().not_null())
                    .col(ColumnDef::new(TaskResult::Priority).integer())
                    .col(
                        ColumnDef::new(TaskResult::Attempt)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TaskResult::NotBefore)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TaskResult::LastChange)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TaskResult::DateDone).timestamp_with_time_zone())
                    .col(ColumnDef::new(TaskResult::Error).text())
                    .col(ColumnDef::new(TaskResult::Report).json_binary())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(Indexes::TaskResultQueueStatus.to_string())
                    .table(TaskResult::Table)
                    .col(TaskResult::Queue)
                    .col(TaskResult::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Task::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Task::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Task::Owner).string().not_null())
                    .col(
                        ColumnDef::new(Task::ExecutionId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Task::TaskName).string().not_null())
                    .col(ColumnDef::new(Task::Params).json_binary().not_null())
                    .col(ColumnDef::new(Task::ParentTaskId).uuid())
                    .col(ColumnDef::new(Task::SourceId).uuid())
                    .col(ColumnDef::new(Task::ComponentId).uuid())
                    .col(
                        ColumnDef::new(Task::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Task::Table, Task::ParentTaskId)
                            .to(Task::Table, Task::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Task::Table, Task::SourceId)
                            .to(Source::Table, Source::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Task::Table, Task::ComponentId)
                            .to(Component::Table, Component::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Task::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TaskResult::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ComponentNode::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Component::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CopyrightDetection::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LicenseDetection::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FileScan::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Path::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(File::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Source::Table).if_exists().to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Indexes {
    PathSourcePath,
    FileScanFileDetector,
    LicenseDetectionUnique,
    CopyrightDetectionUnique,
    ComponentNodeParent,
    ComponentNodeRoot,
    TaskResultQueueStatus,
}

#[derive(DeriveIden)]
enum Source {
    Table,
    Id,
    Checksum,
    ArchiveType,
    Name,
    ScanFlag,
    Created,
}

#[derive(DeriveIden)]
enum File {
    Table,
    Id,
    Swhid,
}

#[derive(DeriveIden)]
enum Path {
    Table,
    Id,
    SourceId,
    FileId,
    Path,
}

#[derive(DeriveIden)]
enum FileScan {
    Table,
    Id,
    FileId,
    Detector,
}

#[derive(DeriveIden)]
enum LicenseDetection {
    Table,
    Id,
    ScanId,
    LicenseKey,
    Score,
    StartLine,
    EndLine,
    FalsePositive,
}

#[derive(DeriveIden)]
enum CopyrightDetection {
    Table,
    Id,
    ScanId,
    Statement,
    StartLine,
    EndLine,
    FalsePositive,
}

#[derive(DeriveIden)]
enum Component {
    Table,
    Id,
    Kind,
    Name,
    Version,
    Release,
    Arch,
    License,
    Purl,
    SourceId,
}

#[derive(DeriveIden)]
enum ComponentNode {
    Table,
    Id,
    ComponentId,
    ParentId,
}

#[derive(DeriveIden)]
enum Task {
    Table,
    Id,
    Owner,
    ExecutionId,
    TaskName,
    Params,
    ParentTaskId,
    SourceId,
    ComponentId,
    Created,
}

#[derive(DeriveIden)]
enum TaskResult {
    Table,
    ExecutionId,
    TaskName,
    Args,
    Kwargs,
    Status,
    Queue,
    Priority,
    Attempt,
    NotBefore,
    LastChange,
    DateDone,
    Error,
    Report,
}
