use crate::{
    dedup::{ContentIndex, ManifestEntry},
    Error,
};
use openlcs_common::{
    db::{
        chunk::{chunked_with, EntityChunkedIter},
        Database,
    },
    hashing::ContentId,
};
use openlcs_entity::{file, file_scan, path};
use sea_orm::{
    prelude::*, sea_query::OnConflict, sea_query::Query, ActiveValue::Set, ConnectionTrait,
    QuerySelect,
};
use std::collections::{HashMap, HashSet};
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct FileService {
    db: Database,
}

impl FileService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// A content index, treating content as known only when it was scanned by all `detectors`.
    pub fn index(&self, detectors: Vec<String>) -> ScannedContent {
        ScannedContent {
            db: self.db.clone(),
            detectors,
        }
    }

    /// Ensure a file record exists for each of the identifiers, returning their database ids.
    #[instrument(skip_all, fields(num = ids.len()), err)]
    pub async fn ensure_files<C: ConnectionTrait>(
        &self,
        ids: &[ContentId],
        connection: &C,
    ) -> Result<HashMap<String, Uuid>, Error> {
        let models = ids.iter().map(|id| file::ActiveModel {
            id: Set(Uuid::new_v4()),
            swhid: Set(id.to_string()),
        });

        for batch in models.chunked() {
            file::Entity::insert_many(batch)
                .on_conflict(
                    OnConflict::column(file::Column::Swhid)
                        .do_nothing()
                        .to_owned(),
                )
                .do_nothing()
                .exec(connection)
                .await?;
        }

        let mut result = HashMap::with_capacity(ids.len());
        for batch in chunked_with(1, ids.iter().map(ContentId::as_str)) {
            let found = file::Entity::find()
                .filter(file::Column::Swhid.is_in(batch))
                .all(connection)
                .await?;
            result.extend(found.into_iter().map(|file| (file.swhid, file.id)));
        }

        Ok(result)
    }

    /// Record the paths of a source, pointing to the files in `files`.
    ///
    /// Paths already recorded for the source are kept.
    #[instrument(skip_all, fields(source_id = %source_id, num = manifest.len()), err)]
    pub async fn insert_paths<C: ConnectionTrait>(
        &self,
        source_id: Uuid,
        manifest: &[ManifestEntry],
        files: &HashMap<String, Uuid>,
        connection: &C,
    ) -> Result<(), Error> {
        let mut models = Vec::with_capacity(manifest.len());
        for entry in manifest {
            let file_id = files
                .get(entry.id.as_str())
                .ok_or_else(|| Error::NotFound(format!("file record for {}", entry.id)))?;
            models.push(path::ActiveModel {
                id: Set(Uuid::new_v4()),
                source_id: Set(source_id),
                file_id: Set(*file_id),
                path: Set(entry.path.clone()),
            });
        }

        for batch in models.chunked() {
            path::Entity::insert_many(batch)
                .on_conflict(
                    OnConflict::columns([path::Column::SourceId, path::Column::Path])
                        .do_nothing()
                        .to_owned(),
                )
                .do_nothing()
                .exec(connection)
                .await?;
        }

        Ok(())
    }

    /// The paths recorded for a source.
    pub async fn paths<C: ConnectionTrait>(
        &self,
        source_id: Uuid,
        connection: &C,
    ) -> Result<Vec<path::Model>, Error> {
        Ok(path::Entity::find()
            .filter(path::Column::SourceId.eq(source_id))
            .all(connection)
            .await?)
    }
}

/// Content which is stored and was scanned by a set of detectors.
#[derive(Clone, Debug)]
pub struct ScannedContent {
    db: Database,
    detectors: Vec<String>,
}

#[async_trait::async_trait]
impl ContentIndex for ScannedContent {
    #[instrument(skip_all, fields(num = ids.len()), err)]
    async fn known(&self, ids: &[ContentId]) -> Result<HashSet<ContentId>, Error> {
        let lookup = ids
            .iter()
            .map(|id| (id.as_str(), id))
            .collect::<HashMap<_, _>>();

        let mut result = HashSet::new();

        for batch in chunked_with(1 + self.detectors.len(), lookup.keys().copied()) {
            let mut select = file::Entity::find()
                .select_only()
                .column(file::Column::Swhid)
                .filter(file::Column::Swhid.is_in(batch));

            for detector in &self.detectors {
                select = select.filter(
                    file::Column::Id.in_subquery(
                        Query::select()
                            .column(file_scan::Column::FileId)
                            .from(file_scan::Entity)
                            .and_where(file_scan::Column::Detector.eq(detector.as_str()))
                            .to_owned(),
                    ),
                );
            }

            let found = select.into_tuple::<String>().all(&self.db).await?;
            result.extend(
                found
                    .iter()
                    .filter_map(|swhid| lookup.get(swhid.as_str()))
                    .map(|id| (*id).clone()),
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::detection::DetectionService;
    use openlcs_test_context::LcsContext;
    use sea_orm::PaginatorTrait;
    use test_context::test_context;
    use test_log::test;

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn ensure_files_is_idempotent(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let service = FileService::new(ctx.db.clone());
        let ids = vec![ContentId::from_bytes("a"), ContentId::from_bytes("b")];

        let first = service.ensure_files(&ids, &ctx.db).await?;
        let second = service.ensure_files(&ids, &ctx.db).await?;

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(file::Entity::find().count(&ctx.db).await?, 2);

        Ok(())
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn known_requires_all_detectors(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let files = FileService::new(ctx.db.clone());
        let detections = DetectionService::new(ctx.db.clone());

        let scanned = ContentId::from_bytes("scanned");
        let partial = ContentId::from_bytes("partial");
        let unknown = ContentId::from_bytes("unknown");

        let map = files
            .ensure_files(&[scanned.clone(), partial.clone()], &ctx.db)
            .await?;

        detections
            .ensure_scans(&[map[scanned.as_str()]], "license(scancode)", &ctx.db)
            .await?;
        detections
            .ensure_scans(&[map[scanned.as_str()]], "copyright(scancode)", &ctx.db)
            .await?;
        detections
            .ensure_scans(&[map[partial.as_str()]], "license(scancode)", &ctx.db)
            .await?;

        let ids = [scanned.clone(), partial.clone(), unknown.clone()];

        let known = files.index(vec![]).known(&ids).await?;
        assert_eq!(known, HashSet::from([scanned.clone(), partial.clone()]));

        let known = files
            .index(vec![
                "license(scancode)".into(),
                "copyright(scancode)".into(),
            ])
            .known(&ids)
            .await?;
        assert_eq!(known, HashSet::from([scanned]));

        Ok(())
    }
}
