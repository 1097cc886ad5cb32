use crate::common::*;
use openlcs_entity::task_result::Status;
use openlcs_module_orchestrator::{
    acquisition::Archive,
    service::{component::ComponentService, task::TaskService},
    tree::ComponentTree,
};
use openlcs_test_context::LcsContext;
use serde_json::json;
use std::sync::{atomic::Ordering, Arc};
use test_context::test_context;
use test_log::test;
use url::Url;

const BINARY_NVR: &str = "ubi9-container-9.2-489";
const SOURCE_NVR: &str = "ubi9-container-source-9.2-489";

#[test_context(LcsContext)]
#[test(tokio::test)]
async fn missing_source_container(ctx: &LcsContext) -> Result<(), anyhow::Error> {
    let build_system = Arc::new(
        FakeBuildSystem::new(ctx.scratch.join("mirror"))?
            .with_bare_build(build(BINARY_NVR, Some(json!({"typeinfo": {"image": {}}})))),
    );
    let pool = pool(
        ctx,
        env(ctx, build_system.clone(), Arc::new(FakeScanner::default())),
    )?;

    let execution_id = submit(ctx, BINARY_NVR).await?;
    pool.run_until_idle().await?;

    let result = status(ctx, execution_id).await?;
    assert_eq!(result.status, Status::Failure);
    assert_eq!(
        result.error.as_deref(),
        Some("no source container build found for: ubi9-container-9.2-489")
    );

    // nothing was downloaded
    assert_eq!(build_system.archive_lookups.load(Ordering::SeqCst), 0);
    assert!(!work_dir(ctx)
        .join(execution_id.to_string())
        .join("download")
        .exists());

    Ok(())
}

#[test_context(LcsContext)]
#[test(tokio::test)]
async fn source_container(ctx: &LcsContext) -> Result<(), anyhow::Error> {
    let remote_source = ctx.scratch.join("remote-source.json");
    std::fs::write(
        &remote_source,
        serde_json::to_vec(&json!({
            "packages": [{
                "name": "github.com/release-engineering/retrodep",
                "type": "gomod",
                "version": "v2.1.1",
                "dependencies": [
                    {"name": "github.com/pkg/errors", "type": "gomod", "version": "v0.8.1"}
                ]
            }]
        }))?,
    )?;
    let remote_source_url =
        Url::from_file_path(&remote_source).map_err(|()| anyhow::anyhow!("invalid path"))?;

    let binary = build(
        BINARY_NVR,
        Some(json!({
            "typeinfo": {
                "image": {},
                "remote-sources": [{"url": remote_source_url.as_str()}]
            }
        })),
    );
    let source = build(
        SOURCE_NVR,
        Some(json!({"image": {"sources_for_nvr": BINARY_NVR}})),
    );

    let build_system = Arc::new(
        fio(ctx)?.with_bare_build(binary).with_build(
            source,
            "images",
            Archive {
                filename: format!("{SOURCE_NVR}.tar.gz"),
                kind: "tar".into(),
                ..Default::default()
            },
            [
                ("blobs/fio-3.1-2.el7.src.rpm", &b"not really an rpm"[..]),
                ("manifest.json", &b"{}"[..]),
            ],
        )?,
    );
    let pool = pool(
        ctx,
        env(ctx, build_system, Arc::new(FakeScanner::default())),
    )?;

    let execution_id = submit(ctx, BINARY_NVR).await?;
    pool.run_until_idle().await?;

    let result = status(ctx, execution_id).await?;
    assert_eq!(result.status, Status::Success, "{:?}", result.error);

    // one import got forked for the source RPM
    let tasks = TaskService::new(ctx.db.clone());
    let task = tasks
        .by_execution_id(execution_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing task"))?;
    let children = tasks.children(task.id).await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].owner, "tester");
    assert_eq!(children[0].params[0]["nvr"], json!("fio-3.1-2.el7"));
    assert!(children[0].params[0]["src_path"]
        .as_str()
        .is_some_and(|path| path.ends_with("fio-3.1-2.el7.src.rpm")));

    // neither the container nor the forked import left anything behind
    let work_dir = work_dir(ctx);
    let leftovers = match std::fs::read_dir(&work_dir) {
        Ok(entries) => entries
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<Result<Vec<_>, _>>()?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => vec![],
        Err(err) => return Err(err.into()),
    };
    assert!(leftovers.is_empty(), "left in scratch space: {leftovers:?}");

    // the container component has no source of its own
    let component = ComponentService::new(ctx.db.clone())
        .find_by_purl("pkg:oci/ubi9-container@9.2-489")
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing component"))?;
    assert_eq!(component.source_id, None);
    assert_eq!(task.component_id, Some(component.id));

    // the remote sources are its children
    let mut remote = ComponentTree::new(ctx.db.clone())
        .children(component.id)
        .await?
        .into_iter()
        .filter(|child| child.kind == "gomod")
        .map(|child| (child.name, child.version))
        .collect::<Vec<_>>();
    remote.sort();
    assert_eq!(
        remote,
        vec![
            ("github.com/pkg/errors".to_string(), "v0.8.1".to_string()),
            (
                "github.com/release-engineering/retrodep".to_string(),
                "v2.1.1".to_string()
            ),
        ]
    );

    Ok(())
}
