use super::on_conflict_retry;
use crate::Error;
use openlcs_common::db::Database;
use openlcs_entity::component;
use packageurl::PackageUrl;
use sea_orm::{prelude::*, ActiveValue::Set, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// The identity of a component, as derived from a build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// The package type, like `rpm`, `maven`, or `oci`
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub arch: String,
    pub license: Option<String>,
}

impl ComponentInfo {
    /// The package url of the component.
    pub fn purl(&self) -> Result<String, Error> {
        let invalid =
            |err: packageurl::Error| Error::Configuration(format!("invalid package url: {err}"));

        let mut purl = PackageUrl::new(self.kind.as_str(), self.name.as_str()).map_err(invalid)?;

        if let Some(namespace) = &self.namespace {
            purl.with_namespace(namespace.as_str());
        }

        if self.release.is_empty() {
            purl.with_version(self.version.as_str());
        } else {
            purl.with_version(format!("{}-{}", self.version, self.release));
        }

        if !self.arch.is_empty() {
            purl.add_qualifier("arch", self.arch.as_str())
                .map_err(invalid)?;
        }

        Ok(purl.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ComponentService {
    db: Database,
}

impl ComponentService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_by_purl(&self, purl: &str) -> Result<Option<component::Model>, Error> {
        Ok(component::Entity::find()
            .filter(component::Column::Purl.eq(purl))
            .one(&self.db)
            .await?)
    }

    /// Get the component by its package url, or create it.
    ///
    /// A source belongs to a single component. If the source is already linked to a different
    /// component, the new one is created without a source.
    #[instrument(skip(self, info), fields(name = %info.name), err)]
    pub async fn get_or_create(
        &self,
        info: &ComponentInfo,
        source_id: Option<Uuid>,
    ) -> Result<component::Model, Error> {
        let purl = info.purl()?;
        let purl = &purl;

        on_conflict_retry(|| async {
            if let Some(found) = self.find_by_purl(purl).await? {
                return Ok(found);
            }

            let source_id = match source_id {
                Some(source_id) => {
                    let taken = component::Entity::find()
                        .filter(component::Column::SourceId.eq(source_id))
                        .one(&self.db)
                        .await?;
                    match taken {
                        Some(other) => {
                            log::warn!(
                                "Source {source_id} already belongs to {}, not linking {purl}",
                                other.purl
                            );
                            None
                        }
                        None => Some(source_id),
                    }
                }
                None => None,
            };

            let model = component::ActiveModel {
                id: Set(Uuid::new_v4()),
                kind: Set(info.kind.clone()),
                name: Set(info.name.clone()),
                version: Set(info.version.clone()),
                release: Set(info.release.clone()),
                arch: Set(info.arch.clone()),
                license: Set(info.license.clone()),
                purl: Set(purl.clone()),
                source_id: Set(source_id),
            }
            .insert(&self.db)
            .await?;

            log::info!("Created component {purl}");

            Ok(model)
        })
        .await
    }
}
