use super::{ImportContext, ImportEnv, ImportParams, IMPORT_TASK};
use crate::{
    acquisition::{
        download_build_source, get_build_type, resolve_build, resolve_source_container,
        BuildMetadata, BuildQuery, BuildType,
    },
    broker::Submission,
    dedup::deduplicate,
    report::Phase,
    scan::{plan, Category, ScanOutcome, ScanToken},
    service::{component::ComponentInfo, source::SourceService},
    unpack::is_test_data,
    workflow::Step,
    Error,
};
use sea_orm::TransactionTrait;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};
use uuid::Uuid;
use walkdir::WalkDir;

const SOURCE_RPM_SUFFIX: &str = ".src.rpm";

/// The categories still to be scanned for the source of the import.
///
/// `None` if the source is not known yet.
pub(super) fn pending_scans(context: &ImportContext, env: &ImportEnv) -> Option<Vec<Category>> {
    let source = context.source.as_ref()?;
    Some(plan(
        &SourceService::scan_flag(source),
        &context.params.categories(),
        env.scanner.detector(),
    ))
}

fn token(env: &ImportEnv, category: Category) -> ScanToken {
    ScanToken::new(category, env.scanner.detector())
}

pub struct ResolveBuild;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for ResolveBuild {
    fn name(&self) -> &str {
        "resolve_build"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Download;

        let build = resolve_build(env.build_system.as_ref(), &context.params.build).await?;
        let build_type = get_build_type(&build);

        log::info!("Importing {} ({build_type})", build.nvr);

        context.build = Some(build);
        context.build_type = Some(build_type);

        Ok(())
    }
}

/// Find the source container of a container build. Fails if there is none, before anything
/// gets downloaded.
pub struct ResolveSourceContainer;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for ResolveSourceContainer {
    fn name(&self) -> &str {
        "resolve_source_container"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        let source = resolve_source_container(env.build_system.as_ref(), context.build()?).await?;
        log::info!("Using source container {}", source.nvr);
        context.source_container = Some(source);
        Ok(())
    }
}

pub struct Download;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for Download {
    fn name(&self) -> &str {
        "download"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Download;

        if let Some(src_path) = &context.params.src_path {
            if !tokio::fs::try_exists(src_path).await? {
                return Err(Error::NotFound(format!(
                    "provided source archive: {}",
                    src_path.display()
                )));
            }
            context.archive = Some(src_path.clone());
            return Ok(());
        }

        let build = match &context.source_container {
            Some(source_container) => source_container.clone(),
            None => context.build()?.clone(),
        };
        let build_type = context.build_type.unwrap_or(BuildType::Rpm);

        let archive = download_build_source(
            env.build_system.as_ref(),
            &env.downloader,
            &env.scm,
            &build,
            build_type,
            &context.download_dir(),
        )
        .await?;

        context.archive = Some(archive);

        Ok(())
    }
}

/// Keep a copy of the source archive, learning its checksum.
pub struct StoreArchive;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for StoreArchive {
    fn name(&self) -> &str {
        "store_archive"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        let stored = env
            .storage
            .store_file(context.archive()?)
            .await
            .map_err(Error::storage)?;

        log::debug!("Stored {} as {}", context.archive()?.display(), stored.key());

        context.checksum = Some(stored.key().to_string());

        Ok(())
    }
}

pub struct RegisterSource;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for RegisterSource {
    fn name(&self) -> &str {
        "register_source"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Persist;

        let checksum = ImportContext::require(&context.checksum, "checksum")?;
        let name = file_name(context.archive()?);
        let archive_type = context.build_type.unwrap_or(BuildType::Rpm).to_string();

        let (source, created) = env
            .sources
            .get_or_create(checksum, &archive_type, &name)
            .await?;
        env.tasks.link_source(context.task_id, source.id).await?;

        context.source = Some(source);

        if !created && !super::needs_scan(context, env) {
            log::info!("Source {name} was already scanned");
        }

        Ok(())
    }
}

pub struct Unpack;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for Unpack {
    fn name(&self) -> &str {
        "unpack"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Unpack;

        let dest = context.unpack_dir();
        env.unpacker.extract(context.archive()?, &dest).await?;

        // the source RPMs of a container are imported on their own
        let keep: &[&str] = if context.is_container() {
            &[SOURCE_RPM_SUFFIX]
        } else {
            &[]
        };

        for warning in env.unpacker.unpack_recursive(&dest, keep).await? {
            context.report.add_warning(Phase::Unpack, "", warning);
        }

        context.unpacked = Some(dest);

        Ok(())
    }
}

pub struct Deduplicate;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for Deduplicate {
    fn name(&self) -> &str {
        "deduplicate"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Deduplicate;

        let detectors = pending_scans(context, env)
            .unwrap_or_default()
            .into_iter()
            .map(|category| token(env, category).to_string())
            .collect();

        let result = deduplicate(&env.files.index(detectors), context.unpacked()?).await?;

        context.report.add_items(result.manifest.len());
        context.deduplicated = Some(result);

        Ok(())
    }
}

/// Record the files and paths of the source.
pub struct PersistFiles;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for PersistFiles {
    fn name(&self) -> &str {
        "persist_files"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Persist;

        let source_id = context.source()?.id;
        let deduplicated = context.deduplicated()?;

        let tx = env.db.begin().await?;
        let files = env.files.ensure_files(&deduplicated.ids(), &tx).await?;
        env.files
            .insert_paths(source_id, &deduplicated.manifest, &files, &tx)
            .await?;
        tx.commit().await?;

        context.files = files;

        Ok(())
    }
}

pub struct Scan;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for Scan {
    fn name(&self) -> &str {
        "scan"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Scan;

        let dir = context.unpacked()?.clone();
        let nothing_left = context.deduplicated()?.residual.is_empty();

        for category in pending_scans(context, env).unwrap_or_default() {
            let outcome = if nothing_left {
                ScanOutcome::default()
            } else {
                env.scanner.scan(category, &dir).await
            };

            let triage = outcome.triage(&env.test_data_markers);
            for warning in triage.warnings {
                context
                    .report
                    .add_warning(Phase::Scan, category.to_string(), warning);
            }
            for error in triage.errors {
                context
                    .report
                    .add_error(Phase::Scan, category.to_string(), error);
            }

            context.scans.push((category, outcome));
        }

        Ok(())
    }
}

/// Record the scans of the remaining files, along with their findings.
pub struct PersistDetections;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for PersistDetections {
    fn name(&self) -> &str {
        "persist_detections"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Persist;

        let deduplicated = context.deduplicated()?;
        let files = &context.files;

        let by_path = deduplicated
            .manifest
            .iter()
            .filter_map(|entry| {
                files
                    .get(entry.id.as_str())
                    .map(|file_id| (entry.path.as_str(), *file_id))
            })
            .collect::<HashMap<_, _>>();

        let residual = deduplicated
            .residual
            .iter()
            .filter_map(|id| files.get(id.as_str()).copied())
            .collect::<Vec<_>>();

        let tx = env.db.begin().await?;

        for (category, outcome) in &context.scans {
            if outcome.had_exception {
                log::warn!("Not recording the failed {category} scan");
                continue;
            }

            // files the scanner gave up on, unless they are test data
            let failed = outcome
                .files
                .iter()
                .filter(|file| {
                    !file.errors.is_empty()
                        && !is_test_data(
                            &env.test_data_markers,
                            Path::new(""),
                            Path::new(&file.path),
                        )
                })
                .filter_map(|file| by_path.get(file.path.as_str()).copied())
                .collect::<HashSet<_>>();

            let scanned = residual
                .iter()
                .copied()
                .filter(|file_id| !failed.contains(file_id))
                .collect::<Vec<_>>();

            let detector = token(env, *category).to_string();
            let scans = env
                .detections
                .ensure_scans(&scanned, &detector, &tx)
                .await?;

            let findings = outcome.files.iter().filter_map(|file| {
                let file_id = by_path.get(file.path.as_str())?;
                let scan_id = scans.get(file_id)?;
                Some((*scan_id, file))
            });

            match category {
                Category::License => {
                    env.detections
                        .insert_licenses(
                            findings
                                .flat_map(|(scan_id, file)| {
                                    file.licenses.iter().map(move |finding| (scan_id, finding))
                                })
                                .collect::<Vec<_>>(),
                            &tx,
                        )
                        .await?
                }
                Category::Copyright => {
                    env.detections
                        .insert_copyrights(
                            findings
                                .flat_map(|(scan_id, file)| {
                                    file.copyrights.iter().map(move |finding| (scan_id, finding))
                                })
                                .collect::<Vec<_>>(),
                            &tx,
                        )
                        .await?
                }
            }
        }

        tx.commit().await?;

        Ok(())
    }
}

/// Append the completed scans to the flag of the source.
pub struct UpdateFlag;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for UpdateFlag {
    fn name(&self) -> &str {
        "update_flag"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        let source_id = context.source()?.id;

        let completed = context
            .scans
            .iter()
            .map(|(category, outcome)| (*category, outcome.had_exception))
            .collect::<Vec<_>>();

        for (category, had_exception) in completed {
            let token = token(env, category);
            if had_exception || !env.sources.complete_scan(source_id, &token).await? {
                context.report.add_warning(
                    Phase::Persist,
                    "",
                    format!("scan flag not updated with {token}"),
                );
            }
        }

        if let Some(source) = env.sources.find_by_checksum(&context.source()?.checksum).await? {
            context.source = Some(source);
        }

        Ok(())
    }
}

/// The component identity of a build.
pub fn component_info(build: &BuildMetadata, build_type: BuildType) -> ComponentInfo {
    let base = ComponentInfo {
        kind: String::new(),
        namespace: None,
        name: build.name.clone(),
        version: build.version.clone(),
        release: build.release.clone(),
        arch: String::new(),
        license: None,
    };

    match (build_type, build.maven()) {
        (BuildType::Maven, Some(maven)) => ComponentInfo {
            kind: "maven".into(),
            namespace: Some(maven.group_id),
            name: maven.artifact_id,
            version: maven.version,
            release: String::new(),
            ..base
        },
        (BuildType::Image, _) => ComponentInfo {
            kind: "oci".into(),
            ..base
        },
        (BuildType::Rpm | BuildType::Module, _) => ComponentInfo {
            kind: "rpm".into(),
            arch: "src".into(),
            ..base
        },
        _ => ComponentInfo {
            kind: "generic".into(),
            ..base
        },
    }
}

pub struct CreateComponent;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for CreateComponent {
    fn name(&self) -> &str {
        "create_component"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        context.phase = Phase::Persist;

        let info = component_info(
            context.build()?,
            context.build_type.unwrap_or(BuildType::Rpm),
        );
        let source_id = context.source.as_ref().map(|source| source.id);

        let component = env.components.get_or_create(&info, source_id).await?;
        env.tasks
            .link_component(context.task_id, component.id)
            .await?;

        context.component = Some(component);

        Ok(())
    }
}

pub struct AttachToParent;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for AttachToParent {
    fn name(&self) -> &str {
        "attach_to_parent"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        let parent = ImportContext::require(&context.params.parent_component, "parent")?;
        env.tree
            .build_tree(*parent, &[context.component()?.id])
            .await?;
        Ok(())
    }
}

/// The source RPMs of an unpacked source container, by NVR.
fn source_rpms(root: &Path) -> Result<Vec<(String, PathBuf)>, Error> {
    let mut result = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(nvr) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_suffix(SOURCE_RPM_SUFFIX))
        {
            result.push((nvr.to_string(), entry.into_path()));
        }
    }

    Ok(result)
}

/// Move a file into `<dir>/staged`, returning its new location.
async fn stage(path: &Path, dir: &Path) -> Result<PathBuf, Error> {
    let staged = dir.join(super::STAGED_DIR);
    tokio::fs::create_dir_all(&staged).await?;

    let name = path
        .file_name()
        .ok_or_else(|| Error::Any(anyhow::anyhow!("no file name: {}", path.display())))?;
    let target = staged.join(name);

    if tokio::fs::rename(path, &target).await.is_err() {
        // different file systems
        tokio::fs::copy(path, &target).await?;
        tokio::fs::remove_file(path).await?;
    }

    Ok(target)
}

/// Submit an import for each source RPM of a source container.
pub struct ForkSources;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for ForkSources {
    fn name(&self) -> &str {
        "fork_sources"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        let root = context.unpacked()?.clone();
        let component_id = context.component()?.id;

        let rpms = tokio::task::spawn_blocking(move || source_rpms(&root))
            .await
            .map_err(|err| Error::Any(err.into()))??;

        for (nvr, path) in rpms {
            // moved into the scratch space of the forked import, which removes it when done
            let execution_id = Uuid::new_v4();
            let path = stage(&path, &env.scratch_dir.join(execution_id.to_string())).await?;

            let params = ImportParams {
                build: BuildQuery {
                    nvr: Some(nvr),
                    ..Default::default()
                },
                license_scan: context.params.license_scan,
                copyright_scan: context.params.copyright_scan,
                src_path: Some(path),
                parent_component: Some(component_id),
            };

            env.broker
                .submit_as(
                    execution_id,
                    Submission {
                    task_name: IMPORT_TASK.into(),
                    args: params.to_args()?,
                    kwargs: context.queue.to_kwargs(),
                    owner: context.owner.clone(),
                        parent_task_id: Some(context.task_id),
                        queue: context.queue.clone(),
                    },
                )
                .await?;

            context.forked.push(execution_id);
        }

        if context.forked.is_empty() {
            context
                .report
                .add_warning(Phase::Unpack, "", "no source RPMs in the source container");
        }

        log::info!("Forked {} imports", context.forked.len());
        context.report.add_items(context.forked.len());

        Ok(())
    }
}

/// The components of a remote source document, including their dependencies.
pub fn remote_components(document: &Value) -> Vec<ComponentInfo> {
    fn component(package: &Value) -> Option<ComponentInfo> {
        Some(ComponentInfo {
            kind: package["type"].as_str().unwrap_or("generic").to_string(),
            name: package["name"].as_str()?.to_string(),
            version: package["version"].as_str().unwrap_or_default().to_string(),
            ..Default::default()
        })
    }

    let empty = vec![];
    let packages = document["packages"].as_array().unwrap_or(&empty);

    packages
        .iter()
        .flat_map(|package| {
            let dependencies = package["dependencies"].as_array().unwrap_or(&empty);
            std::iter::once(package).chain(dependencies)
        })
        .filter_map(component)
        .collect()
}

/// Attach the remote sources of a container build as its children.
pub struct LinkRemoteSources;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for LinkRemoteSources {
    fn name(&self) -> &str {
        "link_remote_sources"
    }

    async fn run(&self, context: &mut ImportContext, env: &ImportEnv) -> Result<(), Error> {
        let urls = context.build()?.remote_source_urls();
        if urls.is_empty() {
            return Ok(());
        }

        let documents = env.downloader.fetch_json_all(urls).await?;

        let mut children: Vec<Uuid> = Vec::new();
        for info in documents.iter().flat_map(remote_components) {
            let child = env.components.get_or_create(&info, None).await?;
            if !children.contains(&child.id) {
                children.push(child.id);
            }
        }

        env.tree
            .build_tree(context.component()?.id, &children)
            .await?;

        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
