//! Command line and environment configuration.

use clap::{Args, Parser, Subcommand};
use rules_hub_core::config::{DEFAULT_CONTROL_FILE, DEFAULT_MAX_DOCUMENT_BYTES};
use rules_hub_core::HubConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rules-hub")]
#[command(about = "Serve and edit JSON rule documents spread over a directory tree")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every subcommand.
#[derive(Args, Clone, Debug)]
pub struct HubArgs {
    /// Directory all request paths are resolved under
    #[arg(long, env = "RULES_HUB_ROOT", default_value = ".")]
    pub data_root: PathBuf,

    /// Name of the per-directory access control file
    #[arg(long, env = "RULES_HUB_CONTROL_FILE", default_value = DEFAULT_CONTROL_FILE)]
    pub control_file: String,

    /// Largest document that will be read, in bytes
    #[arg(
        long,
        env = "RULES_HUB_MAX_DOCUMENT_BYTES",
        default_value_t = DEFAULT_MAX_DOCUMENT_BYTES
    )]
    pub max_document_bytes: u64,

    /// Octal permission bits for newly created documents
    #[arg(long, env = "RULES_HUB_FILE_MODE", value_parser = parse_mode, default_value = "0644")]
    pub file_mode: u32,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(format!("{s} is not an octal file mode")),
    }
}

impl HubArgs {
    pub fn into_config(self) -> HubConfig {
        HubConfig {
            data_root: self.data_root,
            control_file: self.control_file,
            max_document_bytes: self.max_document_bytes,
            file_mode: self.file_mode,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        #[command(flatten)]
        hub: HubArgs,

        /// Address to listen on
        #[arg(short, long, env = "RULES_HUB_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        /// HS256 secret for bearer tokens; without it only X-User-Id is honored
        #[arg(long, env = "RULES_HUB_JWT_SECRET", hide_env_values = true)]
        jwt_secret: Option<String>,
    },

    /// Walk one folder and print the tree as JSON
    Walk {
        #[command(flatten)]
        hub: HubArgs,

        /// Folder to walk, relative to the data root
        root: PathBuf,

        #[arg(short, long, default_value_t = 0)]
        depth: u32,

        /// Name of the per-folder rules subfolder
        #[arg(long)]
        rule_folder: Option<String>,

        /// Rule file name prefix; repeatable
        #[arg(long = "prefix")]
        prefixes: Vec<String>,

        /// Rule document merged onto each child folder; repeatable
        #[arg(long = "lookahead")]
        lookahead: Vec<String>,

        /// Evaluate access control as this user
        #[arg(long)]
        user: Option<String>,
    },
}
