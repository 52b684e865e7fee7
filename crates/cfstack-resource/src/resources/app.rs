//! `cloudfoundry_app`
//!
//! Create runs `POST → bits or docker image → bind routes and services →
//! start → staged → running`. Updates send only changed fields, then
//! restage or restart when the change needs it and the app is not stopped.
//!
//! With `strategy = "blue-green"` a running app that would restage or
//! restart is replaced instead: the old app is renamed `<name>-venerable`,
//! a new app is rolled out next to it on the same routes, and the old one
//! is deleted once every new instance runs. The app id changes.

use super::{found, seconds, set_delta};
use crate::diff::ChangeSet;
use crate::error::{ProviderError, Result};
use crate::mapper::{to_body, to_state};
use crate::normalize::Normalize;
use crate::resource::{OpContext, Resource};
use crate::schema::{Attribute, RelationKind, Schema};
use crate::state::{Attrs, AttrsExt};
use async_trait::async_trait;
use cfstack_api::resources::apps::{STATE_STARTED, STATE_STOPPED};
use cfstack_api::resources::logs;
use cfstack_api::{ApiError, DeleteOptions, bits};
use cfstack_config::AppLogsMax;
use cfstack_manifest::{Application, ManifestSource};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Staging and start deadline when none is configured.
const DEFAULT_TIMEOUT_SECS: u64 = 15 * 60;

/// Changes that need a new droplet
const RESTAGE_ON: &[&str] = &["buildpack", "stack", "service_bindings", "environment"];

/// Changes the running instances only pick up after a restart
const RESTART_ON: &[&str] = &[
    "memory",
    "disk_quota",
    "command",
    "health_check_http_endpoint",
    "docker_image",
    "health_check_type",
    "environment",
];

pub struct App {
    schema: Schema,
}

impl App {
    pub fn new() -> Self {
        let attributes = vec![
            Attribute::string("name").required(),
            Attribute::string("space")
                .required()
                .force_new()
                .field("space_guid")
                .relation(RelationKind::Space),
            Attribute::int("instances").default(json!(1)),
            Attribute::int("memory")
                .optional_computed()
                .normalize(Normalize::MemoryMb),
            Attribute::int("disk_quota")
                .optional_computed()
                .normalize(Normalize::MemoryMb),
            Attribute::string("stack")
                .optional_computed()
                .field("stack_guid")
                .relation(RelationKind::Stack),
            Attribute::string("buildpack"),
            Attribute::string("command").optional_computed(),
            Attribute::bool("enable_ssh").optional_computed(),
            Attribute::int("timeout")
                .optional_computed()
                .field("health_check_timeout")
                .normalize(Normalize::DurationSecs),
            Attribute::string("health_check_type")
                .default(json!("port"))
                .validate(crate::one_of!("port", "process", "http", "none")),
            Attribute::string("health_check_http_endpoint"),
            Attribute::string("docker_image"),
            Attribute::map("docker_credentials").sensitive().local(),
            Attribute::map("environment")
                .sensitive()
                .field("environment_json"),
            Attribute::bool("stopped").unmapped().default(json!(false)),
            Attribute::string("path").local(),
            Attribute::string("source_code_hash").local(),
            Attribute::set("routes").unmapped().optional_computed(),
            Attribute::block("service_bindings")
                .unmapped()
                .normalize(Normalize::SortedSet),
            Attribute::int("staging_timeout")
                .local()
                .normalize(Normalize::DurationSecs)
                .default(json!(DEFAULT_TIMEOUT_SECS)),
            Attribute::int("start_timeout")
                .local()
                .normalize(Normalize::DurationSecs)
                .default(json!(DEFAULT_TIMEOUT_SECS)),
            Attribute::string("manifest_path").local(),
            Attribute::list("vars_files").local(),
            Attribute::map("vars").local(),
            Attribute::string("strategy")
                .local()
                .validate(crate::one_of!("none", "standard", "blue-green")),
        ];
        Self {
            schema: Schema::new("cloudfoundry_app", attributes),
        }
    }

    async fn upload(&self, ctx: &OpContext, app: &str, path: &str) -> Result<()> {
        let bits = bits::prepare(Path::new(path)).await?;
        ctx.client().apps().upload_bits(app, &bits).await?;
        Ok(())
    }

    /// `POST` the app in the stopped state.
    async fn create_stopped(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let mut body = to_body(&self.schema, config, None);
        if let Some(credentials) = config.get("docker_credentials").filter(|c| c.is_object()) {
            body.insert("docker_credentials".into(), credentials.clone());
        }
        body.insert("state".into(), json!(STATE_STOPPED));
        let app = ctx.client().apps().create(Value::Object(body)).await?.metadata.guid;
        info!(app = %app, "app created");
        Ok(app)
    }

    /// Bits, routes and services, then start unless stopped. Without a
    /// `path` the package of `bits_from` is copied.
    async fn roll_out(
        &self,
        ctx: &OpContext,
        app: &str,
        config: &Attrs,
        bits_from: Option<&str>,
    ) -> Result<()> {
        let apps = ctx.client().apps();
        if config.str_attr("docker_image").is_none() {
            match (config.str_attr("path"), bits_from) {
                (Some(path), _) => self.upload(ctx, app, path).await?,
                (None, Some(source)) => apps.copy_bits(app, source).await?,
                (None, None) => {}
            }
        }
        for route in config.strings("routes") {
            apps.bind_route(app, &route).await?;
        }
        for (instance, params) in bindings(config) {
            apps.bind_service(app, &instance, params).await?;
        }
        if !config.bool_attr("stopped").unwrap_or(false) {
            self.start(ctx, app, config).await?;
        }
        Ok(())
    }

    /// Replace the running app `id` with a fresh one and return its guid.
    /// A failed rollout deletes the new app and gives the old one its name
    /// back.
    async fn blue_green(&self, ctx: &OpContext, id: &str, prior: &Attrs, config: &Attrs) -> Result<String> {
        let apps = ctx.client().apps();
        let name = config.str_attr("name").unwrap_or_default();
        let old_name = prior.str_attr("name").unwrap_or(name);
        apps.rename(id, &venerable_name(old_name)).await?;

        let fresh = match self.create_stopped(ctx, config).await {
            Ok(fresh) => fresh,
            Err(e) => {
                restore_name(ctx, id, old_name).await;
                return Err(e);
            }
        };
        if let Err(e) = self.roll_out(ctx, &fresh, config, Some(id)).await {
            warn!(app = %fresh, error = %e, "blue-green rollout failed, rolling back");
            if let Err(cleanup) = apps
                .delete(&fresh, DeleteOptions::default().recursive(true))
                .await
            {
                warn!(app = %fresh, error = %cleanup, "cannot delete the new app");
            }
            restore_name(ctx, id, old_name).await;
            return Err(e);
        }

        apps.set_state(id, STATE_STOPPED).await?;
        self.delete(ctx, id, prior).await?;
        info!(old = id, app = %fresh, "blue-green rollout complete");
        Ok(fresh)
    }

    async fn start(&self, ctx: &OpContext, app: &str, config: &Attrs) -> Result<()> {
        ctx.client().apps().set_state(app, STATE_STARTED).await?;
        self.await_running(ctx, app, config).await
    }

    async fn restart(&self, ctx: &OpContext, app: &str, config: &Attrs) -> Result<()> {
        ctx.client().apps().set_state(app, STATE_STOPPED).await?;
        self.start(ctx, app, config).await
    }

    async fn restage(&self, ctx: &OpContext, app: &str, config: &Attrs) -> Result<()> {
        ctx.client().apps().restage(app).await?;
        self.await_running(ctx, app, config).await
    }

    /// Wait for staging, then for every instance to run. Failures carry the
    /// app's recent logs.
    async fn await_running(&self, ctx: &OpContext, app: &str, config: &Attrs) -> Result<()> {
        let apps = ctx.client().apps();
        let staging = seconds(config, "staging_timeout", DEFAULT_TIMEOUT_SECS);
        let start = seconds(config, "start_timeout", DEFAULT_TIMEOUT_SECS);
        let instances = config.int_attr("instances").unwrap_or(1);

        let waited = async {
            apps.wait_staged(app, staging).await?;
            apps.wait_running(app, instances, start).await
        }
        .await;
        match waited {
            Ok(()) => {
                info!(app, instances, "app running");
                Ok(())
            }
            Err(e) => Err(with_logs(ctx, app, e).await),
        }
    }

    async fn sync_routes(&self, ctx: &OpContext, app: &str, config: &Attrs) -> Result<()> {
        let apps = ctx.client().apps();
        let current = found(apps.route_guids(app).await)?.unwrap_or_default();
        let (add, remove) = set_delta(&current, &config.strings("routes"));
        for route in add {
            apps.bind_route(app, &route).await?;
        }
        for route in remove {
            apps.unbind_route(app, &route).await?;
        }
        Ok(())
    }

    /// Rebind services whose parameters changed; bind new ones and unbind
    /// the rest.
    async fn sync_bindings(&self, ctx: &OpContext, app: &str, prior: &Attrs, config: &Attrs) -> Result<()> {
        let apps = ctx.client().apps();
        let desired = bindings(config);
        let recorded = bindings(prior);
        let current = found(apps.service_bindings(app).await)?.unwrap_or_default();

        let mut bound = Vec::new();
        for binding in current {
            let keep = desired
                .get(&binding.service_instance_guid)
                .is_some_and(|params| recorded.get(&binding.service_instance_guid) == Some(params));
            if keep {
                bound.push(binding.service_instance_guid);
            } else {
                apps.unbind_service(&binding.guid).await?;
            }
        }
        for (instance, params) in desired {
            if !bound.contains(&instance) {
                apps.bind_service(app, &instance, params).await?;
            }
        }
        Ok(())
    }
}

fn venerable_name(name: &str) -> String {
    format!("{}-venerable", name)
}

async fn restore_name(ctx: &OpContext, app: &str, name: &str) {
    if let Err(e) = ctx.client().apps().rename(app, name).await {
        warn!(app, name, error = %e, "cannot restore the app name");
    }
}

/// A running app whose change would restage or restart it.
fn rolls_out_blue_green(prior: &Attrs, config: &Attrs, changes: &ChangeSet) -> bool {
    config.str_attr("strategy") == Some("blue-green")
        && !prior.bool_attr("stopped").unwrap_or(false)
        && !config.bool_attr("stopped").unwrap_or(false)
        && (changes.any(&["path", "source_code_hash"])
            || changes.any(RESTAGE_ON)
            || changes.any(RESTART_ON))
}

/// Service instance → binding parameters
fn bindings(attrs: &Attrs) -> BTreeMap<String, Option<Value>> {
    attrs
        .get("service_bindings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|b| {
                    let instance = b.get("service_instance")?.as_str()?;
                    let params = b.get("params").filter(|p| !p.is_null()).cloned();
                    Some((instance.to_string(), params))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn with_logs(ctx: &OpContext, app: &str, source: ApiError) -> ProviderError {
    let limit = ctx.config().app_logs_max;
    if limit == AppLogsMax::Disabled {
        return source.into();
    }
    let logs = match logs::recent(ctx.client(), app, limit).await {
        Ok(lines) => lines
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            warn!(app, error = %e, "cannot fetch recent logs");
            format!("(unavailable: {})", e)
        }
    };
    ProviderError::AppFailed { source, logs }
}

/// Manifest at `path` with the `vars_files` and `vars` of `config`.
pub(crate) fn manifest_source(path: &str, config: &Attrs) -> ManifestSource {
    let mut source = ManifestSource::new(path);
    for file in config.strings("vars_files") {
        source = source.vars_file(file);
    }
    if let Some(vars) = config.get("vars").and_then(Value::as_object) {
        for (name, value) in vars {
            source = source.var(name.clone(), value.clone());
        }
    }
    source
}

fn unset(config: &Attrs, name: &str) -> bool {
    config.get(name).is_none_or(Value::is_null)
}

fn fill(config: &mut Attrs, name: &str, value: Option<Value>) {
    if let Some(value) = value
        && unset(config, name)
    {
        config.insert(name.to_string(), value);
    }
}

/// Fill attributes the configuration leaves unset from the manifest entry.
fn merge_manifest(config: &mut Attrs, app: &Application) {
    fill(
        config,
        "path",
        app.path.as_ref().map(|p| json!(p.to_string_lossy())),
    );
    fill(config, "buildpack", app.first_buildpack().map(|b| json!(b)));
    fill(config, "command", app.command.as_ref().map(|c| json!(c)));
    fill(config, "memory", app.memory.as_ref().map(|m| json!(m)));
    fill(config, "disk_quota", app.disk_quota.as_ref().map(|d| json!(d)));
    fill(config, "instances", app.instances.map(|i| json!(i)));
    fill(config, "stack", app.stack.as_ref().map(|s| json!(s)));
    fill(config, "timeout", app.timeout.map(|t| json!(t)));
    fill(
        config,
        "health_check_type",
        app.health_check_type.as_ref().map(|h| json!(h)),
    );
    fill(
        config,
        "health_check_http_endpoint",
        app.health_check_http_endpoint.as_ref().map(|h| json!(h)),
    );
    fill(
        config,
        "docker_image",
        app.docker.as_ref().map(|d| json!(d.image)),
    );
    if !app.env.is_empty() {
        let env: Map<String, Value> = app.env.clone().into_iter().collect();
        fill(config, "environment", Some(Value::Object(env)));
    }
    if !app.services.is_empty() {
        let bindings: Vec<Value> = app
            .services
            .iter()
            .map(|s| {
                let mut binding = json!({ "service_instance": s.name() });
                if let Some(params) = s.parameters() {
                    binding["params"] = params.clone();
                }
                binding
            })
            .collect();
        fill(config, "service_bindings", Some(Value::Array(bindings)));
    }
}

#[async_trait]
impl Resource for App {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Merge the manifest entry, then resolve service instance names in
    /// `service_bindings` within the app's space.
    async fn prepare(&self, ctx: &OpContext, mut config: Attrs) -> Result<Attrs> {
        if let Some(manifest_path) = config.str_attr("manifest_path") {
            let source = manifest_source(manifest_path, &config);
            let manifest = source.load()?;
            let name = config.str_attr("name").unwrap_or_default().to_string();
            let entry = manifest.application(&name)?.clone();
            merge_manifest(&mut config, &entry);
        }

        let Some(Value::Array(items)) = config.get("service_bindings").cloned() else {
            return Ok(config);
        };
        let space = match config.str_attr("space") {
            Some(space) => Some(
                ctx.resolver
                    .resolve("space", RelationKind::Space, space, None)
                    .await?,
            ),
            None => None,
        };
        let mut resolved = Vec::with_capacity(items.len());
        for mut item in items {
            if let Some(instance) = item.get("service_instance").and_then(Value::as_str) {
                let guid = ctx
                    .resolver
                    .resolve(
                        "service_bindings",
                        RelationKind::ServiceInstance,
                        instance,
                        space.as_deref(),
                    )
                    .await?;
                item["service_instance"] = json!(guid);
            }
            resolved.push(item);
        }
        config.insert("service_bindings".into(), Value::Array(resolved));
        Ok(config)
    }

    async fn create(&self, ctx: &OpContext, config: &Attrs) -> Result<String> {
        let app = self.create_stopped(ctx, config).await?;
        self.roll_out(ctx, &app, config, None).await?;
        Ok(app)
    }

    async fn read(&self, ctx: &OpContext, id: &str, prior: &Attrs) -> Result<Option<Attrs>> {
        let apps = ctx.client().apps();
        let Some(entity) = found(apps.get(id).await)? else {
            return Ok(None);
        };
        let mut state = to_state(&self.schema, &entity.entity, prior);
        state.insert(
            "stopped".into(),
            json!(entity.str_field("state") == Some(STATE_STOPPED)),
        );

        let routes = found(apps.route_guids(id).await)?.unwrap_or_default();
        state.insert("routes".into(), json!(routes));

        // Binding parameters cannot be read back; keep the recorded ones.
        let recorded = bindings(prior);
        let current = found(apps.service_bindings(id).await)?.unwrap_or_default();
        let observed: Vec<Value> = current
            .into_iter()
            .map(|b| {
                let mut binding = json!({ "service_instance": b.service_instance_guid });
                if let Some(Some(params)) = recorded.get(&b.service_instance_guid) {
                    binding["params"] = params.clone();
                }
                binding
            })
            .collect();
        state.insert("service_bindings".into(), Value::Array(observed));
        Ok(Some(state))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<()> {
        let apps = ctx.client().apps();
        let mut body = to_body(&self.schema, config, Some(&changes.changed));
        if changes.has("docker_credentials")
            && let Some(credentials) = config.get("docker_credentials")
        {
            body.insert("docker_credentials".into(), credentials.clone());
        }
        if !body.is_empty() {
            apps.update(id, Value::Object(body)).await?;
        }

        let new_bits = config.str_attr("docker_image").is_none()
            && changes.any(&["path", "source_code_hash"]);
        if new_bits && let Some(path) = config.str_attr("path") {
            self.upload(ctx, id, path).await?;
        }
        if changes.has("routes") {
            self.sync_routes(ctx, id, config).await?;
        }
        if changes.has("service_bindings") {
            self.sync_bindings(ctx, id, prior, config).await?;
        }

        let stopped = config.bool_attr("stopped").unwrap_or(false);
        if stopped {
            if changes.has("stopped") {
                apps.set_state(id, STATE_STOPPED).await?;
                info!(app = id, "app stopped");
            }
            return Ok(());
        }
        if changes.has("stopped") {
            self.start(ctx, id, config).await
        } else if new_bits || changes.any(RESTAGE_ON) {
            info!(app = id, changed = ?changes.changed, "restaging");
            self.restage(ctx, id, config).await
        } else if changes.any(RESTART_ON) {
            info!(app = id, changed = ?changes.changed, "restarting");
            self.restart(ctx, id, config).await
        } else {
            Ok(())
        }
    }

    async fn apply_update(
        &self,
        ctx: &OpContext,
        id: &str,
        prior: &Attrs,
        config: &Attrs,
        changes: &ChangeSet,
    ) -> Result<String> {
        if rolls_out_blue_green(prior, config, changes) {
            info!(app = id, changed = ?changes.changed, "rolling out blue-green");
            return self.blue_green(ctx, id, prior, config).await;
        }
        self.update(ctx, id, prior, config, changes).await?;
        Ok(id.to_string())
    }

    async fn delete(&self, ctx: &OpContext, id: &str, state: &Attrs) -> Result<()> {
        let apps = ctx.client().apps();
        for binding in found(apps.service_bindings(id).await)?.unwrap_or_default() {
            apps.unbind_service(&binding.guid).await?;
        }
        for route in state.strings("routes") {
            apps.unbind_route(id, &route).await?;
        }
        apps.delete(id, DeleteOptions::default()).await?;
        info!(app = id, "app deleted");
        Ok(())
    }
}
