use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kafka_reconcile::{
    AclSpec, ClusterConfig, KafkaClient, Lookup, Quota, QuotaEntityType, ResultExt,
    ScramMechanism, Topic, UserScramCredential,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kafka-admin", version, about = "Reconcile Kafka topics, ACLs, quotas and SCRAM users")]
pub struct Cli {
    /// Cluster configuration file (TOML)
    #[arg(short, long, env = "KAFKA_ADMIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bootstrap servers, overriding the configuration file
    #[arg(short, long, value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Topic management
    #[command(subcommand)]
    Topic(TopicCommands),
    /// ACL management
    #[command(subcommand)]
    Acl(AclCommands),
    /// Client quota management
    #[command(subcommand)]
    Quota(QuotaCommands),
    /// SCRAM credential management
    #[command(subcommand)]
    Scram(ScramCommands),
}

#[derive(Subcommand)]
pub enum TopicCommands {
    /// Show partitions, replication factor and topic-level config
    Get { name: String },
    /// List topic names
    List,
    /// Create a topic
    Create {
        name: String,
        #[arg(long, default_value = "1")]
        partitions: i32,
        #[arg(long, default_value = "1")]
        replication_factor: i16,
        /// Config entries as key=value
        #[arg(long = "config", value_parser = parse_key_value)]
        configs: Vec<(String, String)>,
    },
    /// Delete a topic
    Delete { name: String },
}

#[derive(Args)]
pub struct AclArgs {
    #[arg(long)]
    pub principal: String,
    #[arg(long, default_value = "*")]
    pub host: String,
    #[arg(long)]
    pub operation: String,
    #[arg(long, default_value = "Allow")]
    pub permission: String,
    #[arg(long, default_value = "Topic")]
    pub resource_type: String,
    #[arg(long)]
    pub resource_name: String,
    #[arg(long, default_value = "Literal")]
    pub pattern: String,
}

impl From<&AclArgs> for AclSpec {
    fn from(args: &AclArgs) -> Self {
        AclSpec {
            principal: args.principal.clone(),
            host: args.host.clone(),
            operation: args.operation.clone(),
            permission_type: args.permission.clone(),
            resource_type: args.resource_type.clone(),
            resource_name: args.resource_name.clone(),
            pattern_type_filter: args.pattern.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum AclCommands {
    /// List ACLs, optionally for one resource name
    List {
        #[arg(long)]
        resource: Option<String>,
    },
    /// Create an ACL
    Create(AclArgs),
    /// Delete an ACL
    Delete(AclArgs),
}

#[derive(Subcommand)]
pub enum QuotaCommands {
    /// Show the quota of an entity
    Get {
        #[arg(long, default_value = "user")]
        entity_type: String,
        /// Entity name; omit for the default entity
        #[arg(long, default_value = "")]
        entity: String,
    },
    /// Set quota limits and wait until they are visible
    Set {
        #[arg(long, default_value = "user")]
        entity_type: String,
        #[arg(long, default_value = "")]
        entity: String,
        /// Limits as key=value, e.g. producer_byte_rate=1048576
        #[arg(long = "limit", value_parser = parse_key_value, required = true)]
        limits: Vec<(String, String)>,
        /// Validate without applying
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove every limit of an entity
    Delete {
        #[arg(long, default_value = "user")]
        entity_type: String,
        #[arg(long, default_value = "")]
        entity: String,
    },
}

#[derive(Subcommand)]
pub enum ScramCommands {
    /// Show a user's SCRAM mechanisms and iterations
    Get { username: String },
    /// Create or replace a SCRAM credential
    Upsert {
        username: String,
        #[arg(long, default_value = "SCRAM-SHA-512")]
        mechanism: String,
        #[arg(long, default_value = "4096")]
        iterations: i32,
        /// Password; read from KAFKA_ADMIN_PASSWORD when omitted
        #[arg(long, env = "KAFKA_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Delete a SCRAM credential
    Delete {
        username: String,
        #[arg(long, default_value = "SCRAM-SHA-512")]
        mechanism: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

fn print_success(message: &str, no_color: bool) {
    if no_color {
        println!("Success: {}", message);
    } else {
        println!("\x1b[32mSuccess:\x1b[0m {}", message);
    }
}

fn print_error(message: &str, no_color: bool) {
    if no_color {
        eprintln!("Error: {}", message);
    } else {
        eprintln!("\x1b[31mError:\x1b[0m {}", message);
    }
}

fn print_lookup<T: Serialize>(lookup: Lookup<T>, what: &str, no_color: bool) -> anyhow::Result<()> {
    match lookup {
        Lookup::Found(value) => print_json(&value),
        Lookup::NotFound => {
            print_error(&format!("{} not found", what), no_color);
            std::process::exit(2);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ClusterConfig> {
    let mut config = match &cli.config {
        Some(path) => ClusterConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClusterConfig::default(),
    };
    if !cli.bootstrap.is_empty() {
        config.bootstrap_servers = cli.bootstrap.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_topic(cmd: &TopicCommands, client: &KafkaClient, cli: &Cli) -> anyhow::Result<()> {
    let topics = client.topics();
    match cmd {
        TopicCommands::Get { name } => {
            print_lookup(topics.read(name).await.found()?, &format!("Topic '{}'", name), cli.no_color)?;
        }
        TopicCommands::List => print_json(&topics.list().await?)?,
        TopicCommands::Create {
            name,
            partitions,
            replication_factor,
            configs,
        } => {
            let topic = configs.iter().fold(
                Topic::new(name.clone(), *partitions, *replication_factor),
                |topic, (key, value)| topic.with_config(key.clone(), value.clone()),
            );
            topics.create(&topic).await?;
            print_success(&format!("Topic '{}' created", name), cli.no_color);
        }
        TopicCommands::Delete { name } => {
            topics.delete(name).await?;
            print_success(&format!("Topic '{}' deleted", name), cli.no_color);
        }
    }
    Ok(())
}

async fn run_acl(cmd: &AclCommands, client: &KafkaClient, cli: &Cli) -> anyhow::Result<()> {
    let acls = client.acls();
    match cmd {
        AclCommands::List { resource: Some(name) } => print_json(&acls.acls_for_resource(name).await?)?,
        AclCommands::List { resource: None } => print_json(&*acls.list().await?)?,
        AclCommands::Create(args) => {
            let binding = acls.create(&AclSpec::from(args)).await?;
            print_success(&format!("ACL {} created", binding), cli.no_color);
        }
        AclCommands::Delete(args) => {
            acls.delete(&AclSpec::from(args)).await?;
            print_success("ACL deleted", cli.no_color);
        }
    }
    Ok(())
}

async fn run_quota(cmd: &QuotaCommands, client: &KafkaClient, cli: &Cli) -> anyhow::Result<()> {
    let quotas = client.quotas();
    match cmd {
        QuotaCommands::Get { entity_type, entity } => {
            let entity_type: QuotaEntityType = entity_type.parse()?;
            let lookup = quotas.describe(entity_type, entity).await.found()?;
            print_lookup(lookup, &format!("Quota for {} '{}'", entity_type, entity), cli.no_color)?;
        }
        QuotaCommands::Set {
            entity_type,
            entity,
            limits,
            dry_run,
        } => {
            let mut quota = Quota::new(entity_type.parse()?, entity.clone());
            for (key, value) in limits {
                let value: f64 = value
                    .parse()
                    .with_context(|| format!("limit {} must be a number", key))?;
                quota = quota.with_limit(key.clone(), value);
            }

            if *dry_run {
                quotas.alter(&quota, true).await?;
                print_success(&format!("Quota {} is valid", quota.id()), cli.no_color);
            } else {
                print_json(&quotas.create(&quota).await?)?;
            }
        }
        QuotaCommands::Delete { entity_type, entity } => {
            quotas.delete(entity_type.parse()?, entity).await?;
            print_success("Quota deleted", cli.no_color);
        }
    }
    Ok(())
}

async fn run_scram(cmd: &ScramCommands, client: &KafkaClient, cli: &Cli) -> anyhow::Result<()> {
    let credentials = client.credentials();
    match cmd {
        ScramCommands::Get { username } => {
            let lookup = credentials.describe(username).await.found()?;
            print_lookup(lookup, &format!("SCRAM credentials for '{}'", username), cli.no_color)?;
        }
        ScramCommands::Upsert {
            username,
            mechanism,
            iterations,
            password,
        } => {
            let credential = UserScramCredential {
                username: username.clone(),
                mechanism: mechanism.parse()?,
                iterations: *iterations,
                password: password.clone(),
            };
            credentials.upsert(&credential).await?;
            print_success(&format!("Credential {} upserted", credential.id()), cli.no_color);
        }
        ScramCommands::Delete { username, mechanism } => {
            let mechanism: ScramMechanism = mechanism.parse()?;
            credentials.delete(username, mechanism).await?;
            print_success("Credential deleted", cli.no_color);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(bootstrap = ?config.bootstrap_servers, "Loaded configuration");

    let client = match KafkaClient::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            print_error(&e.to_string(), cli.no_color);
            std::process::exit(1);
        }
    };
    info!("Connected");

    let result = match &cli.command {
        Commands::Topic(cmd) => run_topic(cmd, &client, &cli).await,
        Commands::Acl(cmd) => run_acl(cmd, &client, &cli).await,
        Commands::Quota(cmd) => run_quota(cmd, &client, &cli).await,
        Commands::Scram(cmd) => run_scram(cmd, &client, &cli).await,
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e), cli.no_color);
        std::process::exit(1);
    }
    Ok(())
}
