use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use futures::prelude::*;
use kubestellar_binding_policy::{
    api::{ApiClient, ListedPolicy},
    connection::Connection,
    inventory::{ManagedCluster, Workload},
    k8s, poll, validate, yaml, Coordinator, EndpointKind, Inventory, Notice,
    PolicyConfiguration, PolicySink,
};
use serde::Deserialize;
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "binding-policy", version)]
struct Args {
    /// The tracing filter used for logs
    #[clap(long, env = "BINDING_POLICY_LOG", default_value = "info")]
    log_level: String,

    /// The logging format
    #[clap(long, default_value = "plain")]
    log_format: LogFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Validates a policy configuration and prints its BindingPolicy manifest
    Render {
        /// A YAML or JSON policy configuration
        #[clap(long, short)]
        file: PathBuf,

        /// Print a summary table instead of the manifest
        #[clap(long)]
        summary: bool,
    },

    /// Connects a workload to a cluster and prints the resulting policy
    Connect {
        /// A YAML or JSON file listing `workloads` and `clusters`
        #[clap(long)]
        inventory: PathBuf,

        #[clap(long)]
        workload: String,

        #[clap(long)]
        cluster: String,

        #[clap(long)]
        namespace: Option<String>,

        /// Also create the policy through the backend API
        #[clap(long)]
        submit: bool,

        /// Print summary tables of the connection and policy instead of the
        /// manifest
        #[clap(long)]
        summary: bool,

        #[clap(flatten)]
        api: ApiArgs,
    },

    /// Lists the binding policies known to the backend
    List {
        #[clap(long)]
        namespace: Option<String>,

        /// Print each policy's manifest instead of a table
        #[clap(long)]
        manifests: bool,

        #[clap(flatten)]
        api: ApiArgs,
    },

    /// Deletes binding policies by name
    Delete {
        #[clap(required = true)]
        names: Vec<String>,

        /// Namespace of a single deleted policy
        #[clap(long, default_value = "default")]
        namespace: String,

        #[clap(flatten)]
        api: ApiArgs,
    },

    /// Polls a cluster's onboarding status until it is approved
    Status {
        #[clap(long)]
        name: String,

        #[clap(long, default_value = "5s")]
        interval: humantime::Duration,

        #[clap(flatten)]
        api: ApiArgs,
    },

    /// Logs in and prints the authenticated identity
    Login {
        #[clap(long)]
        username: String,

        #[clap(long, env = "BINDING_POLICY_PASSWORD", hide_env_values = true)]
        password: String,

        #[clap(flatten)]
        api: ApiArgs,
    },
}

#[derive(clap::Args)]
struct ApiArgs {
    /// Base URL of the console backend
    #[clap(
        long,
        env = "BINDING_POLICY_API",
        default_value = "http://localhost:4000"
    )]
    api_addr: String,

    /// Bearer token from a previous login
    #[clap(long, env = "BINDING_POLICY_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Copy, Clone, Debug)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Deserialize)]
struct InventoryFile {
    #[serde(default)]
    workloads: Vec<Workload>,
    #[serde(default)]
    clusters: Vec<ManagedCluster>,
}

/// Keeps the saved policy so it can be printed (and submitted) afterwards.
#[derive(Default)]
struct Captured(RefCell<Option<PolicyConfiguration>>);

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        command,
    } = Args::parse();

    init_tracing(&log_level, log_format)?;

    match command {
        Command::Render { file, summary } => {
            let config: PolicyConfiguration = read_file(&file)?;
            validate(&config)
                .into_result()
                .with_context(|| format!("{} is not a valid policy", file.display()))?;
            if summary {
                println!("{}", summary_table(&config));
            } else {
                print!("{}", yaml::project(&config));
            }
        }

        Command::Connect {
            inventory,
            workload,
            cluster,
            namespace,
            submit,
            summary,
            api,
        } => {
            let InventoryFile {
                workloads,
                clusters,
            } = read_file(&inventory)?;
            let inventory = Inventory::new(workloads, clusters);

            let mut coordinator = Coordinator::new();
            for (kind, id) in [
                (EndpointKind::Workload, &workload),
                (EndpointKind::Cluster, &cluster),
            ] {
                if let Some(Notice::Warning(warning)) = coordinator.select(&inventory, kind, id) {
                    bail!(warning);
                }
            }
            let connection = coordinator
                .connection()
                .cloned()
                .ok_or_else(|| anyhow!("connection was not completed"))?;
            tracing::info!(
                workload = %connection.workload.name,
                workload_namespace = %connection.workload_namespace,
                cluster = %connection.cluster.name,
                "resolved connection"
            );
            if let (Some(ns), Some(form)) = (namespace, coordinator.form_mut()) {
                form.set_namespace(ns);
            }

            let captured = Captured::default();
            let notice = coordinator.save(&captured)?;
            let config = captured
                .0
                .into_inner()
                .ok_or_else(|| anyhow!("no policy was saved"))?;

            if submit {
                api.client()
                    .create_policy(&config)
                    .await
                    .context("failed to create binding policy")?;
            }
            if let Notice::Success(msg) = notice {
                tracing::info!("{msg}");
            }
            if summary {
                println!("{}", connection_table(&inventory, &connection));
                println!("{}", summary_table(&config));
            } else {
                print!("{}", yaml::project(&config));
            }
        }

        Command::List {
            namespace,
            manifests,
            api,
        } => {
            let policies = api.client().list_policies(namespace.as_deref()).await?;
            if !manifests {
                println!("{}", policies_table(&policies));
                return Ok(());
            }
            for policy in &policies {
                let config = policy
                    .resource()
                    .map_err(anyhow::Error::from)
                    .and_then(PolicyConfiguration::try_from);
                match config {
                    Ok(config) => print!("---\n{}", yaml::project(&config)),
                    Err(error) => {
                        tracing::warn!(name = %policy.name(), %error, "skipping unreadable binding policy")
                    }
                }
            }
        }

        Command::Delete {
            names,
            namespace,
            api,
        } => {
            let client = api.client();
            let rsp = match names.as_slice() {
                [name] => client.delete_policy(name, &namespace).await,
                names => client.delete_policies(names).await,
            }
            .context("failed to delete binding policies")?;
            println!("{}", rsp.message);
        }

        Command::Status {
            name,
            interval,
            api,
        } => {
            let client = Arc::new(api.client());
            let updates = poll::statuses(client, name.clone(), interval.into());
            futures::pin_mut!(updates);
            while let Some(update) = updates.next().await {
                let status = update?;
                let message = status.message.as_deref().unwrap_or("");
                if status.approved {
                    println!("{name}: approved {message}");
                } else {
                    println!("{name}: pending {message}");
                }
            }
        }

        Command::Login {
            username,
            password,
            api,
        } => {
            let client = api.client();
            client.login(&username, &password).await?;
            let user = client.whoami().await.context("token was not accepted")?;
            println!("logged in as {}", user.username);
            if !user.permissions.is_empty() {
                println!("permissions: {}", user.permissions.join(", "));
            }
            if let Some(token) = client.token() {
                println!("export BINDING_POLICY_TOKEN={token}");
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!(e))
}

/// Reads YAML or JSON; JSON documents are valid YAML.
fn read_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn table(header: Vec<&str>) -> comfy_table::Table {
    use comfy_table::{presets::UTF8_FULL, *};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Row::from(header));
    table
}

fn join(items: Vec<String>) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join("\n")
    }
}

fn label_lines(labels: &k8s::labels::Map) -> String {
    join(labels.iter().map(|(k, v)| format!("{k}={v}")).collect())
}

fn connection_table(inventory: &Inventory, connection: &Connection) -> comfy_table::Table {
    let workload = inventory.find_workload(&connection.workload.id);
    let cluster = inventory.find_cluster(&connection.cluster.id);

    let mut table = table(vec!["ENDPOINT", "NAME", "NAMESPACE", "STATUS", "LABELS"]);
    table.add_row(vec![
        "workload".to_string(),
        connection.workload.name.clone(),
        connection.workload_namespace.clone(),
        "-".to_string(),
        workload.map(|w| label_lines(&w.labels)).unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "cluster".to_string(),
        connection.cluster.name.clone(),
        "-".to_string(),
        cluster
            .map(|c| c.status.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "-".to_string()),
        cluster.map(|c| label_lines(&c.labels)).unwrap_or_else(|| "-".to_string()),
    ]);
    table
}

fn policies_table(policies: &[ListedPolicy]) -> comfy_table::Table {
    let mut table = table(vec!["NAME", "NAMESPACE", "CREATED"]);
    for policy in policies {
        table.add_row(vec![
            policy.name().to_string(),
            policy.namespace().to_string(),
            policy.created().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table
}

fn summary_table(config: &PolicyConfiguration) -> comfy_table::Table {
    let mut table = table(vec!["FIELD", "VALUE"]);
    let rows = vec![
        ("NAME", config.name.clone()),
        ("NAMESPACE", config.namespace.clone()),
        ("PROPAGATION", config.propagation_mode.to_string()),
        ("UPDATE STRATEGY", config.update_strategy.to_string()),
        ("DEPLOYMENT", config.deployment_type.to_string()),
        ("LABELS", label_lines(&config.custom_labels)),
        (
            "RULES",
            join(
                config
                    .scheduling_rules
                    .iter()
                    .map(|r| format!("{} {} {}", r.resource, r.operator, r.value).trim_end().to_string())
                    .collect(),
            ),
        ),
        ("TOLERATIONS", join(config.tolerations.clone())),
    ];
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    table
}

// === impl LogFormat ===

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(format!("invalid log format '{s}': expected 'plain' or 'json'")),
        }
    }
}

// === impl ApiArgs ===

impl ApiArgs {
    fn client(&self) -> ApiClient {
        let client = ApiClient::new(&self.api_addr);
        match self.token {
            Some(ref token) => client.with_token(token),
            None => client,
        }
    }
}

// === impl Captured ===

impl PolicySink for Captured {
    fn persist(&self, config: &PolicyConfiguration) -> Result<()> {
        *self.0.borrow_mut() = Some(config.clone());
        Ok(())
    }
}
