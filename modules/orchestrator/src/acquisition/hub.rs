use super::{Archive, BuildMetadata, BuildSystem, BuildType};
use crate::{config::BuildSystemConfig, Error};
use openlcs_common::retry::RetryPolicy;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;
use url::Url;

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// A build system client, talking JSON-RPC to the hub.
#[derive(Clone, Debug)]
pub struct HubClient {
    client: reqwest::Client,
    hub_url: Url,
    top_url: Url,
    retry: RetryPolicy,
}

impl HubClient {
    pub fn new(client: reqwest::Client, hub_url: Url, top_url: Url) -> Self {
        Self {
            client,
            hub_url,
            top_url,
            retry: Default::default(),
        }
    }

    pub fn from_config(client: reqwest::Client, config: &BuildSystemConfig) -> Result<Self, Error> {
        match (&config.hub_url, &config.top_url) {
            (Some(hub_url), Some(top_url)) => {
                Ok(Self::new(client, hub_url.clone(), top_url.clone()))
            }
            _ => Err(Error::Configuration(
                "both the hub URL and the top URL of the build system are required".into(),
            )),
        }
    }

    #[instrument(skip(self, params), err)]
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, Error> {
        let request = Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let request = &request;
        let response: Response<T> = self
            .retry
            .run(Error::is_transient, move || async move {
                Ok::<_, Error>(
                    self.client
                        .post(self.hub_url.clone())
                        .json(request)
                        .send()
                        .await?
                        .error_for_status()?
                        .json()
                        .await?,
                )
            })
            .await
            .map_err(Error::from_transient)?;

        if let Some(error) = response.error {
            return Err(Error::Any(anyhow::anyhow!(
                "{method} failed ({}): {}",
                error.code,
                error.message
            )));
        }

        Ok(response.result)
    }
}

#[async_trait::async_trait]
impl BuildSystem for HubClient {
    async fn get_build(&self, nvr: &str) -> Result<Option<BuildMetadata>, Error> {
        self.call("getBuild", json!([nvr])).await
    }

    async fn get_rpm_build(&self, nvra: &str) -> Result<Option<BuildMetadata>, Error> {
        #[derive(Deserialize)]
        struct Rpm {
            build_id: i64,
        }

        let Some(rpm) = self.call::<Rpm>("getRPM", json!([nvra])).await? else {
            return Ok(None);
        };

        self.call("getBuild", json!([rpm.build_id])).await
    }

    async fn get_latest_build(
        &self,
        tag: &str,
        package_name: &str,
    ) -> Result<Option<BuildMetadata>, Error> {
        let builds: Vec<BuildMetadata> = self
            .call("getLatestBuilds", json!([tag, {"package": package_name}]))
            .await?
            .unwrap_or_default();
        Ok(builds.into_iter().next())
    }

    async fn list_archives(
        &self,
        build: &BuildMetadata,
        build_type: BuildType,
    ) -> Result<Vec<Archive>, Error> {
        let archives = match build_type {
            // RPMs are not archives for the hub
            BuildType::Rpm | BuildType::Module => self
                .call::<Vec<Value>>("listRPMs", json!([build.id]))
                .await?
                .unwrap_or_default()
                .into_iter()
                .map(|rpm| {
                    let nvr = format!(
                        "{}-{}-{}",
                        rpm["name"].as_str().unwrap_or_default(),
                        rpm["version"].as_str().unwrap_or_default(),
                        rpm["release"].as_str().unwrap_or_default()
                    );
                    let arch = rpm["arch"].as_str().unwrap_or_default();
                    Archive {
                        filename: format!("{nvr}.{arch}.rpm"),
                        kind: "rpm".into(),
                        arch: Some(arch.to_string()),
                        ..Default::default()
                    }
                })
                .collect(),
            build_type => self
                .call(
                    "listArchives",
                    json!([build.id, null, null, null, build_type.to_string()]),
                )
                .await?
                .unwrap_or_default(),
        };

        Ok(archives)
    }

    async fn get_latest_source_container_build(
        &self,
        binary_nvr: &str,
    ) -> Result<Option<BuildMetadata>, Error> {
        let builds: Vec<BuildMetadata> = self
            .call(
                "listBuilds",
                json!({
                    "type": "image",
                    "queryOpts": {"order": "-build_id", "limit": 1},
                    "extra": {"image": {"sources_for_nvr": binary_nvr}},
                }),
            )
            .await?
            .unwrap_or_default();
        Ok(builds.into_iter().next())
    }

    fn top_url(&self) -> &Url {
        &self.top_url
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn response() {
        let response: Response<BuildMetadata> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "build_id": 42,
                "name": "fio",
                "version": "3.1",
                "release": "2.el7",
                "nvr": "fio-3.1-2.el7",
                "extra": null
            }
        }))
        .expect("valid response");

        let build = response.result.expect("has result");
        assert_eq!(build.id, 42);
        assert_eq!(build.nvr, "fio-3.1-2.el7");
        assert!(response.error.is_none());

        let response: Response<BuildMetadata> =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null}))
                .expect("valid response");
        assert!(response.result.is_none());
    }

    #[test]
    fn config() {
        let config = BuildSystemConfig {
            hub_url: Url::parse("https://hub.example.com/rpc").ok(),
            top_url: None,
        };
        assert!(matches!(
            HubClient::from_config(Default::default(), &config),
            Err(Error::Configuration(_))
        ));
    }
}
