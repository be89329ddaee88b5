use std::io;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::auth::{self, AuthError};
use crate::batch::ExitStatus;
use crate::client::models::{CloudInitConfig, ClusterDefaults, GroupData, InstanceInfo};
use crate::client::DataKind;
use crate::commands::{
    configs, data, defaults, group, node, service, Context, ContextOptions, TokenNeed,
};
use crate::config::Config;
use crate::format::{HeaderPolicy, OutputFormat};
use crate::logging::{self, LogFormat, LogLevel};
use crate::payload::{self, Fallback, InputFormat};
use crate::prompts;

#[derive(Parser)]
#[command(name = "ochami", version)]
#[command(about = "Command line client for OpenCHAMI's cloud-init service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to configuration file
    #[arg(short = 'c', long, env = "OCHAMI_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Cluster to use (overrides default-cluster)
    #[arg(short = 'C', long, env = "OCHAMI_CLUSTER", global = true)]
    pub cluster: Option<String>,

    /// CA certificate (PEM) used to verify the service
    #[arg(long, global = true)]
    pub cacert: Option<PathBuf>,

    /// Do not verify TLS certificates
    #[arg(short = 'k', long, global = true)]
    pub insecure: bool,

    /// Access token (overrides <CLUSTER>_ACCESS_TOKEN and the keyring)
    #[arg(short = 't', long, global = true)]
    pub token: Option<String>,

    /// Log level
    #[arg(short = 'l', long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format
    #[arg(short = 'L', long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage cloud-init configs, groups, node data and defaults
    #[command(name = "cloud-init")]
    CloudInit(CloudInitArgs),

    /// Authentication commands
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store the --token value in the keyring for the selected cluster
    Login,
    /// Remove the stored token for the selected cluster
    Logout,
    /// Show where the token comes from and when it expires
    Status,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Dotted configuration key (e.g., clusters.demo.uri)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Get a configuration value
    Get {
        /// Dotted configuration key
        key: String,
    },
}

#[derive(Args)]
pub struct CloudInitArgs {
    /// Absolute base URI of cloud-init, or a path relative to the cluster URI
    #[arg(short = 'u', long, global = true)]
    pub uri: Option<String>,

    /// Use the token-protected config and data routes
    #[arg(short = 's', long, global = true)]
    pub secure: bool,

    #[command(subcommand)]
    pub command: CloudInitCommands,
}

#[derive(Subcommand)]
pub enum CloudInitCommands {
    /// Manage cloud-init configs
    #[command(subcommand)]
    Config(CiConfigCommands),
    /// Get user-data, meta-data or vendor-data of configs
    #[command(subcommand)]
    Data(DataCommands),
    /// Manage cluster-wide defaults
    #[command(subcommand)]
    Defaults(DefaultsCommands),
    /// Manage groups
    #[command(subcommand)]
    Group(GroupCommands),
    /// Inspect and set per-node data
    #[command(subcommand)]
    Node(NodeCommands),
    /// Query the service itself
    #[command(subcommand)]
    Service(ServiceCommands),
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// Payload data, or @<path> to read a file (@- reads standard input)
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Format of the payload
    #[arg(short = 'f', long = "format-input", value_enum, default_value_t = InputFormat::Json)]
    pub format_input: InputFormat,
}

impl PayloadArgs {
    fn read_list<T: serde::de::DeserializeOwned>(&self, fallback: Fallback) -> Result<Vec<T>> {
        let bytes = payload::read_input(self.data.as_deref(), fallback)?;
        Ok(payload::decode_list(&bytes, self.format_input)?)
    }
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Format of output printed to standard output
    #[arg(short = 'F', long = "format-output", value_enum, default_value_t = OutputFormat::Json)]
    pub format_output: OutputFormat,
}

#[derive(Args, Debug)]
pub struct HeaderArgs {
    /// When to print a header above each printed body
    #[arg(long, value_enum, default_value_t = HeaderPolicy::Multiple)]
    pub headers: HeaderPolicy,
}

#[derive(Subcommand)]
pub enum CiConfigCommands {
    /// Add one or more configs
    Add {
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Get all configs, or the ones named
    Get {
        ids: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        headers: HeaderArgs,
    },
    /// Replace one or more configs
    #[command(alias = "update")]
    Set {
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Delete one or more configs
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Do not ask for confirmation
        #[arg(long)]
        no_confirm: bool,
    },
}

#[derive(Subcommand)]
pub enum DataCommands {
    /// Print data for one or more configs (user-data by default)
    Get {
        /// Fetch user-data
        #[arg(long, conflicts_with_all = ["meta", "vendor"])]
        user: bool,
        /// Fetch meta-data
        #[arg(long, conflicts_with = "vendor")]
        meta: bool,
        /// Fetch vendor-data
        #[arg(long)]
        vendor: bool,
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        headers: HeaderArgs,
    },
}

#[derive(Subcommand)]
pub enum DefaultsCommands {
    /// Get the cluster defaults
    Get {
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Set the cluster defaults (reads standard input without -d)
    Set {
        #[command(flatten)]
        payload: PayloadArgs,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Add one or more groups (reads standard input without -d)
    Add {
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Get group data
    #[command(subcommand)]
    Get(GroupGetCommands),
    /// Replace one or more groups (reads standard input without -d)
    Set {
        #[command(flatten)]
        payload: PayloadArgs,
    },
    /// Render a group's cloud-config template for a node
    Render {
        group: String,
        node: String,
    },
    /// Delete groups named as arguments or in a -d payload
    Delete {
        names: Vec<String>,
        /// Payload of groups to delete, or @<path> (@- reads standard input)
        #[arg(short = 'd', long, conflicts_with = "names")]
        data: Option<String>,
        /// Format of the payload
        #[arg(short = 'f', long = "format-input", value_enum, default_value_t = InputFormat::Json)]
        format_input: InputFormat,
        /// Do not ask for confirmation
        #[arg(long)]
        no_confirm: bool,
    },
}

#[derive(Subcommand)]
pub enum GroupGetCommands {
    /// Print the cloud-config of all groups, or the ones named
    Config {
        names: Vec<String>,
        #[command(flatten)]
        headers: HeaderArgs,
    },
    /// Print the meta-data of all groups, or the ones named
    MetaData {
        names: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print complete group objects
    Raw {
        names: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Get data as rendered for specific nodes
    #[command(subcommand)]
    Get(NodeGetCommands),
    /// Set instance info for one or more nodes (reads standard input without -d)
    Set {
        #[command(flatten)]
        payload: PayloadArgs,
    },
}

#[derive(Subcommand)]
pub enum NodeGetCommands {
    /// Print the cloud-config each group renders for a node
    Group {
        node: String,
        #[arg(required = true)]
        groups: Vec<String>,
        #[command(flatten)]
        headers: HeaderArgs,
    },
    /// Print meta-data of one or more nodes
    MetaData {
        #[arg(required = true)]
        nodes: Vec<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print user-data of one or more nodes
    UserData {
        #[arg(required = true)]
        nodes: Vec<String>,
        #[command(flatten)]
        headers: HeaderArgs,
    },
    /// Print vendor-data of one or more nodes
    VendorData {
        #[arg(required = true)]
        nodes: Vec<String>,
        #[command(flatten)]
        headers: HeaderArgs,
    },
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Print the service version
    Version {
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Report whether the service is running
    Status {
        /// Print the OpenAPI document instead
        #[arg(long, conflicts_with = "quiet")]
        api: bool,
        /// Print nothing; exit 0 if running, 1 if not
        #[arg(short, long)]
        quiet: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
}

impl CloudInitCommands {
    fn token_need(&self) -> TokenNeed {
        match self {
            CloudInitCommands::Config(CiConfigCommands::Get { .. })
            | CloudInitCommands::Data(_) => TokenNeed::Secure,
            CloudInitCommands::Config(_) => TokenNeed::Always,
            CloudInitCommands::Defaults(_)
            | CloudInitCommands::Group(_)
            | CloudInitCommands::Node(_) => TokenNeed::AuthEnabled,
            CloudInitCommands::Service(_) => TokenNeed::Never,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<ExitStatus> {
        let loaded = Config::load(self.global.config.as_deref());
        let (level, format) = logging::effective(
            self.global.log_level,
            self.global.log_format,
            loaded.as_ref().ok().map(|c| &c.log),
        );
        logging::init(level, format);
        let config = loaded?;

        match self.command {
            Commands::CloudInit(args) => args.run(&self.global, &config).await,
            Commands::Auth(cmd) => {
                let cluster = self
                    .global
                    .cluster
                    .as_deref()
                    .or(config.default_cluster.as_deref());
                match cmd {
                    AuthCommands::Login => {
                        let cluster = cluster.ok_or(AuthError::NoCluster)?;
                        let token = self
                            .global
                            .token
                            .as_deref()
                            .context("Pass the token to store with --token")?;
                        auth::check(token, Utc::now())?;
                        auth::keyring_set(cluster, token)?;
                        println!("{} Token saved for cluster {}", "✓".green(), cluster);
                    }
                    AuthCommands::Logout => {
                        let cluster = cluster.ok_or(AuthError::NoCluster)?;
                        auth::keyring_remove(cluster)?;
                        println!("{} Token removed for cluster {}", "✓".green(), cluster);
                    }
                    AuthCommands::Status => {
                        return Ok(print_auth_status(self.global.token.as_deref(), cluster))
                    }
                }
                Ok(ExitStatus::Success)
            }
            Commands::Config(cmd) => {
                match cmd {
                    ConfigCommands::Set { key, value } => {
                        config.set(&key, &value)?;
                        println!("{} Configuration updated: {} = {}", "✓".green(), key, value);
                        println!("  Saved to {}", config.path().display());
                    }
                    ConfigCommands::Get { key } => match config.get(&key)? {
                        Some(val) => println!("{}", val),
                        None => println!("Configuration key '{}' not found", key),
                    },
                }
                Ok(ExitStatus::Success)
            }
        }
    }
}

fn print_auth_status(flag: Option<&str>, cluster: Option<&str>) -> ExitStatus {
    let Some(token) = auth::resolve(flag, cluster) else {
        println!("{} Not authenticated", "✗".red());
        match cluster {
            Some(c) => println!(
                "  Set {} or run 'ochami --cluster {} auth login --token <token>'",
                auth::env_var_name(c),
                c
            ),
            None => println!("  Select a cluster with --cluster or set default-cluster"),
        }
        return ExitStatus::PartialFailure;
    };

    match auth::check(&token.value, Utc::now()) {
        Ok(claims) => {
            println!("{} Authenticated", "✓".green());
            println!("  Source: {}", token.source);
            if let Some(sub) = &claims.sub {
                println!("  Subject: {}", sub);
            }
            match claims.expires_at() {
                Some(exp) => println!("  Expires: {}", exp),
                None => println!("  Expires: never"),
            }
            ExitStatus::Success
        }
        Err(e) => {
            println!(
                "{} Token from {} is not usable: {}",
                "✗".red(),
                token.source,
                e
            );
            ExitStatus::PartialFailure
        }
    }
}

fn confirmed(no_confirm: bool, targets: &[String]) -> Result<bool> {
    if no_confirm || prompts::confirm_delete(targets)? {
        return Ok(true);
    }
    tracing::info!("user cancelled deletion");
    Ok(false)
}

impl CloudInitArgs {
    async fn run(self, global: &GlobalArgs, config: &Config) -> Result<ExitStatus> {
        let ctx = Context::new(
            ContextOptions {
                cluster: global.cluster.as_deref(),
                uri: self.uri.as_deref(),
                cacert: global.cacert.as_deref(),
                insecure: global.insecure,
                token: global.token.as_deref(),
                secure: self.secure,
                need: self.command.token_need(),
            },
            config,
        )?;
        let mut out = io::stdout();

        match self.command {
            CloudInitCommands::Config(cmd) => match cmd {
                CiConfigCommands::Add { payload } => {
                    let items: Vec<CloudInitConfig> = payload.read_list(Fallback::Required)?;
                    configs::add(&ctx, &items).await
                }
                CiConfigCommands::Get { ids, output, headers } => {
                    configs::get(&ctx, &ids, output.format_output, headers.headers, &mut out).await
                }
                CiConfigCommands::Set { payload } => {
                    let items: Vec<CloudInitConfig> = payload.read_list(Fallback::Required)?;
                    configs::set(&ctx, &items).await
                }
                CiConfigCommands::Delete { ids, no_confirm } => {
                    if !confirmed(no_confirm, &ids)? {
                        return Ok(ExitStatus::Success);
                    }
                    configs::delete(&ctx, &ids).await
                }
            },
            CloudInitCommands::Data(DataCommands::Get {
                user: _,
                meta,
                vendor,
                ids,
                headers,
            }) => {
                let kind = if meta {
                    DataKind::MetaData
                } else if vendor {
                    DataKind::VendorData
                } else {
                    DataKind::UserData
                };
                data::get(&ctx, kind, &ids, headers.headers, &mut out).await
            }
            CloudInitCommands::Defaults(cmd) => match cmd {
                DefaultsCommands::Get { output } => {
                    defaults::get(&ctx, output.format_output, &mut out).await
                }
                DefaultsCommands::Set { payload } => {
                    let bytes = payload::read_input(payload.data.as_deref(), Fallback::Stdin)?;
                    let dflts: ClusterDefaults = payload::decode(&bytes, payload.format_input)?;
                    defaults::set(&ctx, &dflts).await
                }
            },
            CloudInitCommands::Group(cmd) => match cmd {
                GroupCommands::Add { payload } => {
                    let items: Vec<GroupData> = payload.read_list(Fallback::Stdin)?;
                    group::add(&ctx, &items).await
                }
                GroupCommands::Get(get) => match get {
                    GroupGetCommands::Config { names, headers } => {
                        group::get_config(&ctx, &names, headers.headers, &mut out).await
                    }
                    GroupGetCommands::MetaData { names, output } => {
                        group::get_meta_data(&ctx, &names, output.format_output, &mut out).await
                    }
                    GroupGetCommands::Raw { names, output } => {
                        group::get_raw(&ctx, &names, output.format_output, &mut out).await
                    }
                },
                GroupCommands::Set { payload } => {
                    let items: Vec<GroupData> = payload.read_list(Fallback::Stdin)?;
                    group::set(&ctx, &items).await
                }
                GroupCommands::Render { group: name, node } => {
                    group::render(&ctx, &name, &node, &mut out).await
                }
                GroupCommands::Delete {
                    names,
                    data,
                    format_input,
                    no_confirm,
                } => {
                    let names = group::delete_targets(names, data.as_deref(), format_input)?;
                    if !confirmed(no_confirm, &names)? {
                        return Ok(ExitStatus::Success);
                    }
                    group::delete(&ctx, &names).await
                }
            },
            CloudInitCommands::Node(cmd) => match cmd {
                NodeCommands::Get(get) => match get {
                    NodeGetCommands::Group {
                        node,
                        groups,
                        headers,
                    } => node::get_group(&ctx, &node, &groups, headers.headers, &mut out).await,
                    NodeGetCommands::MetaData { nodes, output } => {
                        node::get_meta_data(&ctx, &nodes, output.format_output, &mut out).await
                    }
                    NodeGetCommands::UserData { nodes, headers } => {
                        node::get_data(&ctx, DataKind::UserData, &nodes, headers.headers, &mut out)
                            .await
                    }
                    NodeGetCommands::VendorData { nodes, headers } => {
                        node::get_data(
                            &ctx,
                            DataKind::VendorData,
                            &nodes,
                            headers.headers,
                            &mut out,
                        )
                        .await
                    }
                },
                NodeCommands::Set { payload } => {
                    let items: Vec<InstanceInfo> = payload.read_list(Fallback::Stdin)?;
                    node::set(&ctx, &items).await
                }
            },
            CloudInitCommands::Service(cmd) => match cmd {
                ServiceCommands::Version { output } => {
                    service::version(&ctx, output.format_output, &mut out).await
                }
                ServiceCommands::Status {
                    api: true, output, ..
                } => service::api(&ctx, output.format_output, &mut out).await,
                ServiceCommands::Status { quiet, .. } => {
                    service::status(&ctx, quiet, &mut out).await
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn try_parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("ochami").chain(args.iter().copied()))
    }

    fn parse(args: &[&str]) -> Cli {
        try_parse(args).unwrap()
    }

    #[test]
    fn command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_subcommands() {
        let cli = parse(&[
            "cloud-init", "config", "get", "compute", "--secure", "--cluster", "demo", "-F", "yaml",
        ]);
        assert_eq!(cli.global.cluster.as_deref(), Some("demo"));
        let Commands::CloudInit(args) = cli.command else {
            panic!("expected cloud-init");
        };
        assert!(args.secure);
        match args.command {
            CloudInitCommands::Config(CiConfigCommands::Get { ids, output, headers }) => {
                assert_eq!(ids, ["compute"]);
                assert_eq!(output.format_output, OutputFormat::Yaml);
                assert_eq!(headers.headers, HeaderPolicy::Multiple);
            }
            _ => panic!("expected config get"),
        }
    }

    #[test]
    fn update_is_an_alias_for_set() {
        let cli = parse(&[
            "cloud-init", "config", "update", "-d", "@cfg.yaml", "-f", "yaml",
        ]);
        let Commands::CloudInit(args) = cli.command else {
            panic!("expected cloud-init");
        };
        match args.command {
            CloudInitCommands::Config(CiConfigCommands::Set { payload }) => {
                assert_eq!(payload.data.as_deref(), Some("@cfg.yaml"));
                assert_eq!(payload.format_input, InputFormat::Yaml);
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn group_delete_rejects_data_and_names_together() {
        let err = try_parse(&["cloud-init", "group", "delete", "compute", "-d", "{}"]);
        assert!(err.is_err());
    }

    #[test]
    fn group_render_takes_group_then_node() {
        let cli = parse(&["cloud-init", "group", "render", "compute", "x1000"]);
        let Commands::CloudInit(args) = cli.command else {
            panic!("expected cloud-init");
        };
        match args.command {
            CloudInitCommands::Group(GroupCommands::Render { group, node }) => {
                assert_eq!(group, "compute");
                assert_eq!(node, "x1000");
            }
            _ => panic!("expected group render"),
        }
        let missing_node = try_parse(&["cloud-init", "group", "render", "compute"]);
        assert!(missing_node.is_err());
    }

    #[test]
    fn unknown_formats_are_rejected() {
        let xml = try_parse(&["cloud-init", "defaults", "get", "-F", "xml"]);
        assert!(xml.is_err());
        let sometimes = try_parse(&[
            "cloud-init", "node", "get", "user-data", "x1", "--headers", "sometimes",
        ]);
        assert!(sometimes.is_err());
    }

    #[test]
    fn token_needs_per_command() {
        let need = |args: &[&str]| {
            let Commands::CloudInit(ci) = parse(args).command else {
                panic!("expected cloud-init");
            };
            ci.command.token_need()
        };
        assert_eq!(need(&["cloud-init", "config", "get"]), TokenNeed::Secure);
        assert_eq!(
            need(&["cloud-init", "data", "get", "x1"]),
            TokenNeed::Secure
        );
        assert_eq!(
            need(&["cloud-init", "config", "delete", "c"]),
            TokenNeed::Always
        );
        assert_eq!(
            need(&["cloud-init", "group", "get", "raw"]),
            TokenNeed::AuthEnabled
        );
        assert_eq!(need(&["cloud-init", "service", "status"]), TokenNeed::Never);
    }
}
