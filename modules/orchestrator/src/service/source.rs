use super::on_conflict_retry;
use crate::{
    scan::{ScanFlag, ScanToken},
    Error,
};
use openlcs_common::db::Database;
use openlcs_entity::{file_scan, path, source};
use sea_orm::{
    prelude::*, sea_query::Query, ActiveValue::Set, ConnectionTrait, DbErr, QueryFilter,
    QuerySelect,
};
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct SourceService {
    db: Database,
}

impl SourceService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_by_checksum(&self, checksum: &str) -> Result<Option<source::Model>, Error> {
        Ok(source::Entity::find()
            .filter(source::Column::Checksum.eq(checksum))
            .one(&self.db)
            .await?)
    }

    /// Get the source with the checksum, or create it. Returns `true` if the source was created.
    #[instrument(skip(self), err)]
    pub async fn get_or_create(
        &self,
        checksum: &str,
        archive_type: &str,
        name: &str,
    ) -> Result<(source::Model, bool), Error> {
        on_conflict_retry(|| async {
            if let Some(found) = self.find_by_checksum(checksum).await? {
                return Ok((found, false));
            }

            let model = source::ActiveModel {
                id: Set(Uuid::new_v4()),
                checksum: Set(checksum.to_string()),
                archive_type: Set(archive_type.to_string()),
                name: Set(name.to_string()),
                scan_flag: Set(String::new()),
                created: Set(OffsetDateTime::now_utc()),
            }
            .insert(&self.db)
            .await?;

            log::info!("Created source {} for {name}", model.id);

            Ok((model, true))
        })
        .await
    }

    /// The parsed scan flag of a source. Tokens which don't parse are skipped.
    pub fn scan_flag(source: &source::Model) -> ScanFlag {
        let mut flag = ScanFlag::default();
        for token in source.scan_flag.split(',').filter(|t| !t.trim().is_empty()) {
            match token.trim().parse() {
                Ok(token) => {
                    flag.append(token);
                }
                Err(err) => log::warn!("Ignoring scan flag token of source {}: {err}", source.id),
            }
        }
        flag
    }

    /// Append a token to the scan flag of a source, keeping the existing tokens.
    ///
    /// Concurrent updates are detected, and the append gets retried.
    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn append_flag(&self, source_id: Uuid, token: &ScanToken) -> Result<ScanFlag, Error> {
        on_conflict_retry(|| async {
            let source = source::Entity::find_by_id(source_id)
                .one(&self.db)
                .await?
                .ok_or_else(|| Error::NotFound(format!("source {source_id}")))?;

            let Some(updated) = append_token(&source.scan_flag, token) else {
                return Ok(Self::scan_flag(&source));
            };

            let result = source::Entity::update_many()
                .col_expr(source::Column::ScanFlag, Expr::value(updated.clone()))
                .filter(source::Column::Id.eq(source_id))
                .filter(source::Column::ScanFlag.eq(source.scan_flag.clone()))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 0 {
                return Err(DbErr::RecordNotUpdated.into());
            }

            let mut flag = Self::scan_flag(&source);
            flag.append(token.clone());
            Ok(flag)
        })
        .await
    }

    /// Check if every file of a source has a scan record of the detector.
    pub async fn all_files_scanned<C: ConnectionTrait>(
        &self,
        source_id: Uuid,
        detector: &str,
        connection: &C,
    ) -> Result<bool, Error> {
        let missing = path::Entity::find()
            .select_only()
            .column(path::Column::Id)
            .filter(path::Column::SourceId.eq(source_id))
            .filter(
                path::Column::FileId.not_in_subquery(
                    Query::select()
                        .column(file_scan::Column::FileId)
                        .from(file_scan::Entity)
                        .and_where(file_scan::Column::Detector.eq(detector))
                        .to_owned(),
                ),
            )
            .into_tuple::<Uuid>()
            .one(connection)
            .await?;

        Ok(missing.is_none())
    }

    /// Append the token of a completed scan, if every file of the source was scanned.
    ///
    /// Returns `false` if files are missing a scan record, leaving the flag as it is.
    pub async fn complete_scan(&self, source_id: Uuid, token: &ScanToken) -> Result<bool, Error> {
        let detector = token.to_string();
        if !self.all_files_scanned(source_id, &detector, &self.db).await? {
            log::warn!("Not all files of source {source_id} were scanned for {token}");
            return Ok(false);
        }

        self.append_flag(source_id, token).await?;
        Ok(true)
    }
}

/// Append a token to a stored scan flag, or `None` if it is present already.
///
/// Works on the stored text, so tokens which don't parse are kept as they are.
fn append_token(stored: &str, token: &ScanToken) -> Option<String> {
    let token = token.to_string();
    let mut tokens = stored
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();

    if tokens.contains(&token.as_str()) {
        return None;
    }

    if stored.parse::<ScanFlag>().is_err() {
        log::warn!("Keeping unparsable scan flag '{stored}' while appending {token}");
    }

    tokens.push(&token);
    Some(tokens.join(","))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scan::Category;
    use openlcs_test_context::LcsContext;
    use test_context::test_context;
    use test_log::test;

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn get_or_create(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let service = SourceService::new(ctx.db.clone());

        let (first, created) = service.get_or_create("abc", "rpm", "fio").await?;
        assert!(created);
        let (second, created) = service.get_or_create("abc", "rpm", "fio").await?;
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.scan_flag, "");

        Ok(())
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn append_flag(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let service = SourceService::new(ctx.db.clone());
        let (source, _) = service.get_or_create("abc", "rpm", "fio").await?;

        let license = ScanToken::new(Category::License, "scancode-toolkit 30.1.0");
        let copyright = ScanToken::new(Category::Copyright, "scancode-toolkit 30.1.0");

        service.append_flag(source.id, &license).await?;
        service.append_flag(source.id, &copyright).await?;
        service.append_flag(source.id, &license).await?;

        let source = service.find_by_checksum("abc").await?.expect("must exist");
        assert_eq!(
            source.scan_flag,
            "license(scancode-toolkit 30.1.0),copyright(scancode-toolkit 30.1.0)"
        );

        Ok(())
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn append_keeps_unknown_tokens(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let service = SourceService::new(ctx.db.clone());
        let (source, _) = service.get_or_create("abc", "rpm", "fio").await?;

        source::Entity::update_many()
            .col_expr(
                source::Column::ScanFlag,
                Expr::value("license(scancode-toolkit 30.1.0),vulnerability(grype 0.74)"),
            )
            .filter(source::Column::Id.eq(source.id))
            .exec(&ctx.db)
            .await?;

        let copyright = ScanToken::new(Category::Copyright, "scancode-toolkit 30.1.0");
        let flag = service.append_flag(source.id, &copyright).await?;
        assert_eq!(
            flag.to_string(),
            "license(scancode-toolkit 30.1.0),copyright(scancode-toolkit 30.1.0)"
        );

        let source = service.find_by_checksum("abc").await?.expect("must exist");
        assert_eq!(
            source.scan_flag,
            "license(scancode-toolkit 30.1.0),vulnerability(grype 0.74),copyright(scancode-toolkit 30.1.0)"
        );

        // appending again changes nothing
        service.append_flag(source.id, &copyright).await?;
        let again = service.find_by_checksum("abc").await?.expect("must exist");
        assert_eq!(again.scan_flag, source.scan_flag);

        Ok(())
    }
}
