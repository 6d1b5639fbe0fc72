use clap::{Parser, Subcommand};
use radius_plugin::host::attr;
use radius_plugin::{Event, HostEnv, Plugin, PluginConfig, logging};
use std::process;

/// Environment variable the probe reads the password from
const PASSWORD_ENV: &str = "OVPN_RADIUS_PASSWORD";

/// OpenVPN RADIUS plugin - configuration and connectivity tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "ovpn-radius")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a configuration file and print a summary
    Validate {
        #[arg(value_name = "CONFIG")]
        config_path: String,
    },

    /// Write an example configuration file
    Example {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Run one client through verify, connect and disconnect
    Probe {
        /// Path to configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: String,

        /// User name to authenticate (password is read from OVPN_RADIUS_PASSWORD)
        #[arg(short, long)]
        username: String,

        /// Certificate common name (default: the user name)
        #[arg(long)]
        common_name: Option<String>,

        /// Client address reported as Calling-Station-Id
        #[arg(long, default_value = "127.0.0.1")]
        client_ip: String,

        /// Client source port
        #[arg(long, default_value = "1194")]
        client_port: String,

        /// Tunnel address assigned on connect
        #[arg(long, default_value = "10.8.0.2")]
        framed_ip: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config_path } => validate(&config_path),
        Command::Example { path } => {
            if let Err(e) = PluginConfig::example().to_file(&path) {
                eprintln!("Error creating example config: {}", e);
                process::exit(1);
            }
            println!("Example configuration written to {}", path);
        }
        Command::Probe {
            config,
            username,
            common_name,
            client_ip,
            client_port,
            framed_ip,
        } => {
            let common_name = common_name.unwrap_or_else(|| username.clone());
            let env = HostEnv::new()
                .with(attr::USERNAME, &username)
                .with(attr::UNTRUSTED_IP, &client_ip)
                .with(attr::UNTRUSTED_PORT, &client_port)
                .with(attr::COMMON_NAME, &common_name)
                .with(attr::IFCONFIG_POOL_REMOTE_IP, &framed_ip);
            probe(&config, env);
        }
    }
}

fn validate(config_path: &str) {
    let config = match PluginConfig::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation failed!");
            eprintln!("   Error: {}", e);
            process::exit(1);
        }
    };

    println!("Configuration validated successfully!");
    println!();
    println!("Configuration summary:");
    println!("  NAS-Identifier: {}", config.nas_identifier);
    if let Some(ip) = config.nas_ip_address {
        println!("  NAS-IP-Address: {}", ip);
    }
    println!("  Max sessions: {}", config.max_sessions);
    println!(
        "  Client certificate required: {}",
        !config.client_cert_not_required
    );
    println!("  Username as common name: {}", config.username_as_common_name);
    match config.worker_timeout {
        Some(secs) => println!("  Worker timeout: {}s", secs),
        None => println!("  Worker timeout: none"),
    }
    println!(
        "  Log level: {}",
        config.log_level.as_deref().unwrap_or("(from host verbosity)")
    );
    println!();
    println!("RADIUS servers:");
    for server in &config.servers {
        println!(
            "  {} - {} (auth {}, acct {}, timeout {}s, retries {})",
            server.display_name(),
            server.address,
            server.auth_port,
            server.acct_port,
            server.timeout,
            server.retries
        );
    }
}

fn probe(config_path: &str, env: HostEnv) {
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => {
            eprintln!("Set {} to the password to test", PASSWORD_ENV);
            process::exit(1);
        }
    };

    let config = match PluginConfig::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    logging::init(config.log_level.as_deref().unwrap_or("info"));

    let mut plugin = match Plugin::open(config) {
        Ok(plugin) => plugin,
        Err(e) => {
            eprintln!("Failed to start plugin: {}", e);
            process::exit(1);
        }
    };

    let verify_env = env.clone().with(attr::PASSWORD, &password);
    let steps = [
        (Event::AuthUserPassVerify, &verify_env),
        (Event::ClientConnect, &env),
        (Event::ClientDisconnect, &env),
    ];

    let mut failed = false;
    for (event, env) in steps {
        let result = plugin.handle(event, env);
        let mark = if result.is_success() { "ok" } else { "FAILED" };
        println!("  {:<22} {}", event.to_string(), mark);
        if !result.is_success() {
            failed = true;
            break;
        }
    }

    plugin.close();
    if failed {
        process::exit(1);
    }
}
