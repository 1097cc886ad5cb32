use crate::{
    scan::{CopyrightFinding, LicenseFinding},
    Error,
};
use openlcs_common::db::{
    chunk::{chunked_with, EntityChunkedIter},
    Database,
};
use openlcs_entity::{copyright_detection, file_scan, license_detection, path};
use sea_orm::{
    prelude::*, sea_query::OnConflict, ActiveValue::Set, ConnectionTrait, JoinType, QueryOrder,
    QuerySelect, RelationTrait,
};
use std::collections::HashMap;
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct DetectionService {
    db: Database,
}

impl DetectionService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Ensure a scan record of the detector exists for each file, returning the scan ids by file id.
    #[instrument(skip(self, file_ids, connection), fields(num = file_ids.len()), err)]
    pub async fn ensure_scans<C: ConnectionTrait>(
        &self,
        file_ids: &[Uuid],
        detector: &str,
        connection: &C,
    ) -> Result<HashMap<Uuid, Uuid>, Error> {
        let models = file_ids.iter().map(|file_id| file_scan::ActiveModel {
            id: Set(Uuid::new_v4()),
            file_id: Set(*file_id),
            detector: Set(detector.to_string()),
        });

        for batch in models.chunked() {
            file_scan::Entity::insert_many(batch)
                .on_conflict(
                    OnConflict::columns([file_scan::Column::FileId, file_scan::Column::Detector])
                        .do_nothing()
                        .to_owned(),
                )
                .do_nothing()
                .exec(connection)
                .await?;
        }

        let mut result = HashMap::with_capacity(file_ids.len());
        for batch in chunked_with(2, file_ids.iter().copied()) {
            let found = file_scan::Entity::find()
                .filter(file_scan::Column::Detector.eq(detector))
                .filter(file_scan::Column::FileId.is_in(batch))
                .all(connection)
                .await?;
            result.extend(found.into_iter().map(|scan| (scan.file_id, scan.id)));
        }

        Ok(result)
    }

    /// Store license findings, by scan id. Findings which are already stored are skipped.
    #[instrument(skip_all, err)]
    pub async fn insert_licenses<'a, C: ConnectionTrait>(
        &self,
        findings: impl IntoIterator<Item = (Uuid, &'a LicenseFinding)>,
        connection: &C,
    ) -> Result<(), Error> {
        let models = findings
            .into_iter()
            .map(|(scan_id, finding)| license_detection::ActiveModel {
                id: Set(Uuid::new_v4()),
                scan_id: Set(scan_id),
                license_key: Set(finding.key.clone()),
                score: Set(finding.score),
                start_line: Set(finding.start_line),
                end_line: Set(finding.end_line),
                false_positive: Set(false),
            });

        for batch in models.chunked() {
            license_detection::Entity::insert_many(batch)
                .on_conflict(
                    OnConflict::columns([
                        license_detection::Column::ScanId,
                        license_detection::Column::LicenseKey,
                        license_detection::Column::Score,
                        license_detection::Column::StartLine,
                        license_detection::Column::EndLine,
                        license_detection::Column::FalsePositive,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .do_nothing()
                .exec(connection)
                .await?;
        }

        Ok(())
    }

    /// Store copyright findings, by scan id. Findings which are already stored are skipped.
    #[instrument(skip_all, err)]
    pub async fn insert_copyrights<'a, C: ConnectionTrait>(
        &self,
        findings: impl IntoIterator<Item = (Uuid, &'a CopyrightFinding)>,
        connection: &C,
    ) -> Result<(), Error> {
        let models = findings
            .into_iter()
            .map(|(scan_id, finding)| copyright_detection::ActiveModel {
                id: Set(Uuid::new_v4()),
                scan_id: Set(scan_id),
                statement: Set(finding.statement.clone()),
                start_line: Set(finding.start_line),
                end_line: Set(finding.end_line),
                false_positive: Set(false),
            });

        for batch in models.chunked() {
            copyright_detection::Entity::insert_many(batch)
                .on_conflict(
                    OnConflict::columns([
                        copyright_detection::Column::ScanId,
                        copyright_detection::Column::Statement,
                        copyright_detection::Column::StartLine,
                        copyright_detection::Column::EndLine,
                        copyright_detection::Column::FalsePositive,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .do_nothing()
                .exec(connection)
                .await?;
        }

        Ok(())
    }

    /// The license keys detected in the files of a source, as pairs of path and key.
    pub async fn licenses_of_source(
        &self,
        source_id: Uuid,
    ) -> Result<Vec<(String, String)>, Error> {
        Ok(path::Entity::find()
            .select_only()
            .column(path::Column::Path)
            .column(license_detection::Column::LicenseKey)
            .join(JoinType::InnerJoin, path::Relation::File.def())
            .join(JoinType::InnerJoin, openlcs_entity::file::Relation::Scan.def())
            .join(JoinType::InnerJoin, file_scan::Relation::License.def())
            .filter(path::Column::SourceId.eq(source_id))
            .order_by_asc(path::Column::Path)
            .order_by_asc(license_detection::Column::LicenseKey)
            .into_tuple()
            .all(&self.db)
            .await?)
    }

    /// The copyright statements detected in the files of a source, as pairs of path and statement.
    pub async fn copyrights_of_source(
        &self,
        source_id: Uuid,
    ) -> Result<Vec<(String, String)>, Error> {
        Ok(path::Entity::find()
            .select_only()
            .column(path::Column::Path)
            .column(copyright_detection::Column::Statement)
            .join(JoinType::InnerJoin, path::Relation::File.def())
            .join(JoinType::InnerJoin, openlcs_entity::file::Relation::Scan.def())
            .join(JoinType::InnerJoin, file_scan::Relation::Copyright.def())
            .filter(path::Column::SourceId.eq(source_id))
            .order_by_asc(path::Column::Path)
            .order_by_asc(copyright_detection::Column::Statement)
            .into_tuple()
            .all(&self.db)
            .await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::file::FileService;
    use openlcs_common::hashing::ContentId;
    use openlcs_test_context::LcsContext;
    use sea_orm::PaginatorTrait;
    use test_context::test_context;
    use test_log::test;

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn insert_is_idempotent(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let files = FileService::new(ctx.db.clone());
        let service = DetectionService::new(ctx.db.clone());

        let id = ContentId::from_bytes("int main() {}");
        let map = files.ensure_files(&[id.clone()], &ctx.db).await?;
        let file_id = map[id.as_str()];

        let license = LicenseFinding {
            key: "gpl-2.0".into(),
            score: 100.0,
            start_line: 1,
            end_line: 3,
        };
        let copyright = CopyrightFinding {
            statement: "Copyright (C) 2005 Jens Axboe".into(),
            start_line: 1,
            end_line: 1,
        };

        for _ in 0..2 {
            let scans = service
                .ensure_scans(&[file_id], "license(scancode)", &ctx.db)
                .await?;
            service
                .insert_licenses([(scans[&file_id], &license)], &ctx.db)
                .await?;
            service
                .insert_copyrights([(scans[&file_id], &copyright)], &ctx.db)
                .await?;
        }

        assert_eq!(file_scan::Entity::find().count(&ctx.db).await?, 1);
        assert_eq!(license_detection::Entity::find().count(&ctx.db).await?, 1);
        assert_eq!(copyright_detection::Entity::find().count(&ctx.db).await?, 1);

        Ok(())
    }
}
