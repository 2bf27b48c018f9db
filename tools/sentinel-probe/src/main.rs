//
// Copyright 2020 Joyent, Inc.
//

//
// Claims a pooled connection for a role, runs a single command on it and
// prints which node answered. Useful for watching a failover from the
// client's side of the sentinels.
//
// Results go to stdout and the log to stderr. The -l argument is useful for
// controlling the amount of log spam.
//

use std::env;
use std::io::{self, Write};
use std::sync::Mutex;

use clap::{crate_name, crate_version, App, Arg};
use slog::{o, Drain, Level, LevelFilter, Logger};
use thiserror::Error;

use resp_connection::{RespConnection, RespConnectionConfig, RespError};
use sentinel_pool::backend::Backend;
use sentinel_pool::command::{Command, Reply};
use sentinel_pool::connection::Connection;
use sentinel_pool::connection_pool::types::{ConnectionPoolOptions, Role};
use sentinel_pool::connection_pool::ConnectionPool;
use sentinel_pool::error::Error as PoolError;
use sentinel_pool::resolver::SystemResolver;
use sentinel_pool::sentinel::DEFAULT_SENTINEL_PORT;

const DEFAULT_SENTINEL_HOST: &str = "127.0.0.1";
const DEFAULT_MASTER_NAME: &str = "mymaster";
const DEFAULT_ROLE: &str = "any";
const DEFAULT_COMMAND: &str = "ROLE";
const DEFAULT_CONNECT_TIMEOUT: u64 = 2000;
const DEFAULT_READ_TIMEOUT: u64 = 5000;
const DEFAULT_LOG_LEVEL: Level = Level::Info;
const LOG_LEVEL_ENV_VAR: &str = "SENTINEL_PROBE_LOG_LEVEL";

#[derive(Debug, Error)]
enum ProbeError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Connection(#[from] RespError),
    #[error("unable to write result: {0}")]
    Output(#[from] io::Error),
}

struct ProbeArgs {
    sentinel_host: String,
    sentinel_port: u16,
    master_name: String,
    role: Role,
    database: u32,
    command: Command,
}

fn main() {
    let matches = App::new("Sentinel Pool Probe")
        .version(crate_version!())
        .about("Claims a pooled connection and runs a command on it")
        .arg(
            Arg::with_name("sentinel host")
                .short("s")
                .long("sentinel-host")
                .takes_value(true)
                .help(
                    format!(
                        "Hostname resolving to the sentinel addresses\n\
                         (default: {})",
                        DEFAULT_SENTINEL_HOST
                    )
                    .as_str(),
                ),
        )
        .arg(
            Arg::with_name("sentinel port")
                .short("p")
                .long("sentinel-port")
                .takes_value(true)
                .help(
                    format!(
                        "Port used for sentinel addresses without one\n\
                         (default: {})",
                        DEFAULT_SENTINEL_PORT
                    )
                    .as_str(),
                ),
        )
        .arg(
            Arg::with_name("master name")
                .short("m")
                .long("master-name")
                .takes_value(true)
                .help(
                    format!(
                        "Name the sentinels monitor the replica set under\n\
                         (default: {})",
                        DEFAULT_MASTER_NAME
                    )
                    .as_str(),
                ),
        )
        .arg(
            Arg::with_name("role")
                .short("r")
                .long("role")
                .takes_value(true)
                .help(
                    format!(
                        "Role to claim: master|slave|any\n(default: {})",
                        DEFAULT_ROLE
                    )
                    .as_str(),
                ),
        )
        .arg(
            Arg::with_name("database")
                .short("d")
                .long("database")
                .takes_value(true)
                .help("Database index selected on new connections (default: 0)"),
        )
        .arg(
            Arg::with_name("log level")
                .short("l")
                .long("log-level")
                .takes_value(true)
                .help(
                    format!(
                        "Log level: trace|debug|info|warning|error|critical\n\
                         (uses {} env var if flag not given)\n\
                         (default: {})",
                        LOG_LEVEL_ENV_VAR,
                        format!("{:?}", DEFAULT_LOG_LEVEL).to_lowercase()
                    )
                    .as_str(),
                ),
        )
        .arg(
            Arg::with_name("command")
                .multiple(true)
                .help(
                    format!(
                        "Command to run on the claimed connection\n\
                         (default: {})",
                        DEFAULT_COMMAND
                    )
                    .as_str(),
                ),
        )
        .get_matches();

    let args = parse_args(&matches);

    //
    // Try to get the log level from the CLI arg and, if that fails, the
    // environment variable. If both fail, just use the default.
    //
    let level = match matches.value_of("log level") {
        Some(level_str) => parse_log_level(level_str),
        None => log_level_from_env()
            .map(|level| level.unwrap_or(DEFAULT_LOG_LEVEL)),
    };

    let res = args.and_then(|args| {
        level.and_then(|level| {
            run(args, standard_log(level, io::stderr()), &mut io::stdout())
        })
    });

    std::process::exit(match res {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("error: {}", err);
            1
        }
    });
}

fn parse_args(matches: &clap::ArgMatches) -> Result<ProbeArgs, ProbeError> {
    let sentinel_port = match matches.value_of("sentinel port") {
        Some(p) => p.parse::<u16>().map_err(|_| {
            ProbeError::InvalidArgument(format!("sentinel port {:?}", p))
        })?,
        None => DEFAULT_SENTINEL_PORT,
    };
    let database = match matches.value_of("database") {
        Some(d) => d.parse::<u32>().map_err(|_| {
            ProbeError::InvalidArgument(format!("database {:?}", d))
        })?,
        None => 0,
    };
    let role = matches
        .value_of("role")
        .unwrap_or(DEFAULT_ROLE)
        .parse::<Role>()?;

    let mut tokens: Vec<&str> = matches
        .values_of("command")
        .map(|values| values.collect())
        .unwrap_or_else(Vec::new);
    if tokens.is_empty() {
        tokens.push(DEFAULT_COMMAND);
    }
    let command = tokens[1..]
        .iter()
        .fold(Command::new(tokens[0]), |command, token| command.arg(token));

    Ok(ProbeArgs {
        sentinel_host: matches
            .value_of("sentinel host")
            .unwrap_or(DEFAULT_SENTINEL_HOST)
            .to_string(),
        sentinel_port,
        master_name: matches
            .value_of("master name")
            .unwrap_or(DEFAULT_MASTER_NAME)
            .to_string(),
        role,
        database,
        command,
    })
}

fn run<W: Write>(
    args: ProbeArgs,
    log: Logger,
    out: &mut W,
) -> Result<(), ProbeError> {
    let mut cpo =
        ConnectionPoolOptions::new(args.sentinel_host, args.master_name);
    cpo.sentinel_port = Some(args.sentinel_port);
    cpo.database = Some(args.database);
    cpo.log = Some(log);

    let pool = ConnectionPool::new(
        cpo,
        SystemResolver,
        RespConnection::connection_creator(RespConnectionConfig {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }),
    )?;

    let mut conn = pool.claim(args.role)?;
    let reply = conn.run(&args.command)?;
    report(
        out,
        args.role,
        conn.role(),
        conn.backend(),
        &args.command,
        &reply,
    )?;

    drop(conn);
    pool.stop();
    Ok(())
}

// The result lines, the only thing written to stdout.
fn report<W: Write>(
    out: &mut W,
    asked: Role,
    got: Role,
    backend: &Backend,
    command: &Command,
    reply: &Reply,
) -> io::Result<()> {
    writeln!(out, "asked for {}, got {} {}", asked, got, backend)?;
    writeln!(out, "{}: {}", command, reply)?;
    out.flush()
}

fn parse_log_level(s: &str) -> Result<Level, ProbeError> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(Level::Trace),
        "debug" => Ok(Level::Debug),
        "info" => Ok(Level::Info),
        "warning" => Ok(Level::Warning),
        "error" => Ok(Level::Error),
        "critical" => Ok(Level::Critical),
        _ => Err(ProbeError::InvalidLogLevel(s.to_string())),
    }
}

fn log_level_from_env() -> Result<Option<Level>, ProbeError> {
    match env::var(LOG_LEVEL_ENV_VAR) {
        Ok(level_str) => parse_log_level(&level_str).map(Some),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ProbeError::InvalidLogLevel(
            format!("{} has invalid Unicode data", LOG_LEVEL_ENV_VAR),
        )),
    }
}

fn standard_log<W>(level: Level, out: W) -> Logger
where
    W: Write + Send + 'static,
{
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_bunyan::with_name(crate_name!(), out).build(),
            level,
        ))
        .fuse(),
        o!("build-id" => crate_version!()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use slog::info;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_and_result_are_separate_streams() {
        let log_buf = SharedBuf::default();
        let log = standard_log(Level::Info, log_buf.clone());
        let mut result = Vec::new();

        info!(log, "Connected to master 10.0.1.1:6379");
        report(
            &mut result,
            Role::Any,
            Role::Master,
            &Backend::new("10.0.1.1", 6379),
            &Command::new("ROLE"),
            &Reply::Array(vec![Reply::Str("master".into())]),
        )
        .unwrap();

        let result = String::from_utf8(result).unwrap();
        assert_eq!(
            result,
            "asked for any, got master 10.0.1.1:6379\nROLE: [\"master\"]\n"
        );
        let logged = log_buf.contents();
        assert!(logged.contains("Connected to master"));
        assert!(!logged.contains("asked for"));
    }

    #[test]
    fn log_levels() {
        assert_eq!(parse_log_level("WARNING").unwrap(), Level::Warning);
        assert_eq!(parse_log_level("critical").unwrap(), Level::Critical);
        assert!(parse_log_level("loud").is_err());
    }
}
