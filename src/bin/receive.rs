//! netsend 수신기
//!
//! 연결을 받아 헤더 교환(RTT 프로브 응답 포함) 후 데이터를 파일이나 표준 출력에 쓴다.
//!
//! 예시:
//!   # TCP 6666번에서 받아 버림
//!   netsend-rx -o /dev/null
//!
//!   # 스트림 4개를 받아 out.0 ~ out.3에 저장
//!   netsend-rx -n 4 -o out 0.0.0.0:6666

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use netsend::config::TransferOptions;
use netsend::error::IoContext;
use netsend::multistream::{aggregate, run_streams};
use netsend::transport::{Listener, Transport};
use netsend::{Config, ErrorCategory, Receiver, TransferStats};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatsFormat {
    Human,
    Json,
    None,
}

#[derive(Parser, Debug)]
#[command(
    name = "netsend-rx",
    version,
    about = "netsend 수신기",
    long_about = None
)]
struct Args {
    /// 바인드 주소 (TCP/UDP: host:port, unix: 소켓 경로)
    #[arg(default_value = "0.0.0.0:6666")]
    bind: String,

    /// 출력 파일 (없으면 표준 출력, 멀티 스트림이면 <PATH>.<i>)
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// 트랜스포트 (tcp, udp, udplite, unix)
    #[arg(short = 't', long, default_value = "tcp", value_parser = parse_transport)]
    transport: Transport,

    /// 수신 버퍼 크기 (0이면 기본값)
    #[arg(short = 'b', long, default_value_t = 0, value_name = "BYTES")]
    buffer_size: usize,

    /// 받을 스트림 수
    #[arg(short = 'n', long, default_value_t = 1, value_name = "N")]
    streams: usize,

    /// 통계 출력 형식
    #[arg(long, value_enum, default_value = "human")]
    stats: StatsFormat,

    /// 로그 상세도: -v INFO / -vv DEBUG / -vvv TRACE (기본: WARN)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let config = Config {
            transfer: TransferOptions {
                chunk_size: self.buffer_size,
                ..TransferOptions::default()
            },
            transport: self.transport,
            streams: self.streams,
            ..Config::default()
        };
        config.validate()?;

        if config.streams > 1 && self.output.is_none() {
            bail!(netsend::Error::InvalidConfig(
                "멀티 스트림은 --output이 필요함".into()
            ));
        }
        Ok(config)
    }

    /// 스트림 번호에 맞는 sink
    fn sink(&self, index: usize) -> netsend::Result<Box<dyn Write>> {
        let path = match &self.output {
            None => return Ok(Box::new(std::io::stdout().lock())),
            Some(path) if self.streams > 1 => {
                let mut name = path.clone().into_os_string();
                name.push(format!(".{}", index));
                PathBuf::from(name)
            }
            Some(path) => path.clone(),
        };
        let file = File::create(&path).map_err(|source| netsend::Error::Source { path, source })?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// 이 빌드에서 연결 가능한 트랜스포트만 받는다
fn parse_transport(s: &str) -> std::result::Result<Transport, String> {
    let transport: Transport = s.parse().map_err(|e: netsend::Error| e.to_string())?;
    if !transport.is_supported() {
        return Err(format!("{}는 이 빌드에서 지원하지 않음", transport));
    }
    Ok(transport)
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_stats(stats: &TransferStats, format: StatsFormat) -> Result<()> {
    match format {
        StatsFormat::Human => eprintln!("{}", stats.summary()),
        StatsFormat::Json => eprintln!("{}", serde_json::to_string_pretty(&stats.report())?),
        StatsFormat::None => {}
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let config = args.config()?;
    let listener = Listener::bind(config.transport, &args.bind)?;
    let receiver = Receiver::new(config.clone());

    let results = run_streams(config.streams, |index| {
        let mut channel = listener.accept()?;
        let mut sink = args.sink(index)?;
        let outcome = receiver.receive(&mut *channel, &mut sink)?;
        sink.flush().op("sink flush")?;

        info!(
            "스트림 {}: {} bytes, crc32 {:08x}, peer rtt {:?}",
            index, outcome.stats.total_rx_bytes, outcome.crc32, outcome.header.peer_rtt
        );
        Ok(outcome.stats)
    });

    let summary = aggregate(results);
    if let Some((_, err)) = summary.failures.into_iter().next() {
        return Err(err.into());
    }
    // 데이터가 표준 출력으로 갈 수 있으므로 통계는 stderr
    print_stats(&summary.stats, args.stats)
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<netsend::Error>()
        .map(|e| e.category())
        .unwrap_or(ErrorCategory::Misc)
        .exit_code()
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose) {
        eprintln!("로깅 초기화 실패: {}", e);
        return ExitCode::from(ErrorCategory::Internal.exit_code());
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
