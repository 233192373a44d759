//! 命令行参数与服务器运行配置。

use clap::Parser;
use shadow_rs::formatcp;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "axo-fileman",
    version = VERSION_INFO,
    about = "A simple HTTP file server that supports uploading from the browser"
)]
pub struct Args {
    #[arg(
        short = 'b',
        long = "bind",
        value_name = "ADDRESS",
        env = "FILEMAN_BIND",
        default_value = "0.0.0.0",
        help = "Bind to address"
    )]
    pub host: String,
    #[arg(
        short = 'd',
        long,
        env = "FILEMAN_DIRECTORY",
        default_value = ".",
        help = "Working directory to serve"
    )]
    pub directory: String,
    #[arg(
        short = 'p',
        long,
        env = "FILEMAN_PREFIX",
        default_value = "/",
        help = "URL path prefix (e.g. /files)"
    )]
    pub prefix: String,
    #[arg(
        long,
        env = "FILEMAN_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        env = "FILEMAN_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Bind to port"
    )]
    pub port: u16,
}

/// 启动后不可变的服务器配置。
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub working_dir: PathBuf,
    pub path_prefix: String,
    pub upload_max_size: u64,
}

impl ServerConfig {
    /// 校验并规范化命令行参数：解析地址、规范化目录与前缀。
    pub fn from_args(args: &Args) -> io::Result<Self> {
        let bind_address = parse_bind_address(&args.host)?;
        let working_dir = std::fs::canonicalize(&args.directory)?;
        if !working_dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", working_dir.display()),
            ));
        }
        Ok(Self {
            bind_address,
            port: args.port,
            working_dir,
            path_prefix: normalize_prefix(&args.prefix),
            upload_max_size: args.upload_max_size,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// 将前缀规范化为 `/seg/` 形式，空前缀返回 `/`。
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

// "0" is the shorthand for all interfaces.
fn parse_bind_address(value: &str) -> io::Result<IpAddr> {
    let value = value.trim();
    if value.is_empty() || value == "0" {
        return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    value
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))
}
