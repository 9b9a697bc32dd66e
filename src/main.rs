//! hftoken - secure Hugging Face token provisioning CLI

use std::io::BufRead;
use std::path::Path;

use clap::{Parser, Subcommand};
use hftoken::credential::mask_token;
use hftoken::rewriter::load_existing;
use hftoken::{
    backup_config, extract_tokens, migrate_config, restore_config, sanitize_config, ConfigRewriter,
    CredentialStore, KeyringStore, Paths, Platform, ProvisionReport, Provisioner, RewriteOutcome,
    ScriptGenerator, Settings, ValidationResult,
};

#[derive(Parser)]
#[command(name = "hftoken")]
#[command(about = "Store a Hugging Face token securely and wire MCP server configs to use it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// MCP host config file (default: Claude Desktop config)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a token in the OS credential store, then provision the config
    Store {
        /// Token to store (read from stdin if omitted)
        token: Option<String>,

        /// Validate the token before storing it
        #[arg(long)]
        validate: bool,

        /// Only store the token; leave the config and script alone
        #[arg(long)]
        no_provision: bool,
    },

    /// Show the stored token (masked unless --reveal)
    Retrieve {
        #[arg(long)]
        reveal: bool,
    },

    /// Delete the stored token
    Delete,

    /// Check a token against the Hugging Face API (default: the stored token)
    Validate {
        token: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate the wrapper script and update the config file
    Provision {
        /// Target platform instead of the host (macos, linux, windows)
        #[arg(long)]
        platform: Option<String>,
    },

    /// Only generate the wrapper script next to the config file
    GenerateScript {
        /// Target platform instead of the host (macos, linux, windows)
        #[arg(long)]
        platform: Option<String>,
    },

    /// Back up the config file
    Backup,

    /// Move a token hardcoded in the config file into secure storage
    Migrate {
        /// Only move the token; leave the wrapper script alone
        #[arg(long)]
        no_provision: bool,
    },

    /// Remove hardcoded tokens from the config file (backs up first)
    Sanitize {
        /// Skip the backup
        #[arg(long)]
        no_backup: bool,
    },

    /// Restore the config file from a backup
    Restore {
        /// Backup file to restore
        backup: String,
    },

    /// Show resolved paths and settings (for debugging)
    Paths,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut paths = Paths::resolve();
    if let Some(ref config) = cli.config {
        paths = paths.with_config_path(config);
    }
    let settings = Settings::resolve();
    let store = KeyringStore::new();

    match cli.command {
        Commands::Paths => {
            println!("Config file:    {}", paths.config_path().display());
            println!("Config exists:  {}", paths.config_path().exists());
            println!("Backup dir:     {}", paths.backup_dir().display());
            println!("Identity URL:   {}", settings.whoami_url);
            println!("Name patterns:  {}", settings.matcher.needles().join(", "));
        }
        Commands::Store {
            token,
            validate,
            no_provision,
        } => {
            let token = match token {
                Some(t) => t,
                None => read_token_from_stdin(),
            };
            if validate {
                let result = settings.validator().validate(&token);
                if !result.is_valid {
                    fail(&result.message);
                }
                print_validation(&result);
            }
            if let Err(e) = store.store(&token) {
                fail(&e.to_string());
            }
            println!("Token stored in secure storage.");
            if !no_provision {
                run_provision(&store, &paths, &settings, None);
            }
        }
        Commands::Retrieve { reveal } => match store.retrieve() {
            Ok(Some(token)) if reveal => println!("{}", token),
            Ok(Some(token)) => println!("{}", mask_token(&token)),
            Ok(None) => {
                eprintln!("No token stored.");
                std::process::exit(1);
            }
            Err(e) => fail(&e.to_string()),
        },
        Commands::Delete => match store.delete() {
            Ok(()) => println!("Token deleted."),
            Err(e) => fail(&e.to_string()),
        },
        Commands::Validate { token, json } => {
            let token = match token {
                Some(t) => t,
                None => match store.retrieve() {
                    Ok(Some(t)) => t,
                    Ok(None) => fail("No token stored; pass one as an argument"),
                    Err(e) => fail(&e.to_string()),
                },
            };
            let result = settings.validator().validate(&token);
            if json {
                match serde_json::to_string_pretty(&result) {
                    Ok(output) => println!("{output}"),
                    Err(e) => fail(&e.to_string()),
                }
            } else {
                print_validation(&result);
            }
            if !result.is_valid {
                std::process::exit(1);
            }
        }
        Commands::Provision { platform } => {
            run_provision(&store, &paths, &settings, platform.as_deref());
        }
        Commands::GenerateScript { platform } => {
            let generator = match platform.as_deref() {
                Some(p) => ScriptGenerator::new(parse_platform(p)),
                None => ScriptGenerator::for_host().unwrap_or_else(|e| fail(&e.to_string())),
            };
            match generator.generate(paths.config_path()) {
                Ok(path) => println!("Wrote {}", path.display()),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Backup => match backup_config(paths.config_path(), paths.backup_dir()) {
            Ok(path) => println!("Backed up to {}", path.display()),
            Err(e) => fail(&e.to_string()),
        },
        Commands::Migrate { no_provision } => {
            let report = match migrate_config(paths.config_path(), paths.backup_dir(), &store) {
                Ok(report) => report,
                Err(e) => fail(&e.to_string()),
            };
            let Some(ref backup) = report.backup_path else {
                println!("No hardcoded tokens found.");
                return;
            };
            println!("Backed up to {}", backup.display());
            println!("Token moved to secure storage from: {}", report.servers.join(", "));
            if report.cleaned {
                println!("Removed hardcoded tokens from {}", paths.config_path().display());
            }
            if !no_provision {
                run_provision(&store, &paths, &settings, None);
            }
        }
        Commands::Sanitize { no_backup } => {
            guard_unmigrated_tokens(&store, paths.config_path());
            if !no_backup {
                match backup_config(paths.config_path(), paths.backup_dir()) {
                    Ok(path) => println!("Backed up to {}", path.display()),
                    Err(e) => fail(&e.to_string()),
                }
            }
            match sanitize_config(paths.config_path()) {
                Ok(true) => println!("Removed hardcoded tokens from {}", paths.config_path().display()),
                Ok(false) => println!("No hardcoded tokens found."),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Restore { backup } => {
            match restore_config(Path::new(&backup), paths.config_path()) {
                Ok(()) => println!("Restored {} from {}", paths.config_path().display(), backup),
                Err(e) => fail(&e.to_string()),
            }
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Refuse to strip tokens from the config while secure storage is empty.
fn guard_unmigrated_tokens(store: &dyn CredentialStore, config_path: &Path) {
    match store.retrieve() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => fail(&e.to_string()),
    }
    let doc = match load_existing(config_path) {
        Ok(Some(doc)) => doc,
        Ok(None) => return,
        Err(e) => fail(&e.to_string()),
    };
    if !extract_tokens(&doc).is_empty() {
        fail("The config holds the only copy of a token; run 'hftoken migrate' instead");
    }
}

fn parse_platform(name: &str) -> Platform {
    Platform::parse(name).unwrap_or_else(|e| fail(&e.to_string()))
}

fn read_token_from_stdin() -> String {
    eprintln!("Enter Hugging Face token:");
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        fail(&format!("Failed to read token: {}", e));
    }
    let token = line.trim().to_string();
    if token.is_empty() {
        fail("Token is empty");
    }
    token
}

fn run_provision(
    store: &dyn CredentialStore,
    paths: &Paths,
    settings: &Settings,
    os: Option<&str>,
) {
    let mut provisioner = Provisioner::new(store, ConfigRewriter::new(settings.matcher.clone()));
    if let Some(name) = os {
        provisioner = provisioner.with_os(name);
    }
    match provisioner.provision(paths.config_path()) {
        Ok(report) => print_report(&report, paths.config_path()),
        Err(e) => fail(&e.to_string()),
    }
}

fn print_report(report: &ProvisionReport, config_path: &Path) {
    const INDENT: &str = "        ";

    println!("{}", config_path.display());
    println!("{}Platform:  {}", INDENT, report.platform);
    println!("{}Wrapper:   {}", INDENT, report.script_path.display());
    match &report.outcome {
        RewriteOutcome::Annotated(names) => {
            println!("{}Updated:   {}", INDENT, names.join(", "));
        }
        RewriteOutcome::Synthesized(name) => {
            println!("{}Added:     {}", INDENT, name);
        }
    }
}

fn print_validation(result: &ValidationResult) {
    const INDENT: &str = "        ";

    println!("{}", result.message);
    if let Some(ref user) = result.username {
        println!("{}User:  {}", INDENT, user);
    }
    if !result.orgs.is_empty() {
        println!("{}Orgs:  {}", INDENT, result.orgs.join(", "));
    }
}
