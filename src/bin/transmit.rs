//! netsend 송신기
//!
//! 파일, 표준 입력 또는 명령 출력을 원격 수신기로 보내고 통계를 출력한다.
//!
//! 예시:
//!   # 파일을 sendfile로 전송
//!   netsend-tx -f data.bin -m sendfile 10.0.0.2:6666
//!
//!   # RTT 측정 (20회, 64바이트) 후 read/write 전송
//!   netsend-tx -f data.bin -R 20n,64d 10.0.0.2:6666
//!
//!   # 명령 출력의 앞 10 청크만 전송
//!   netsend-tx --exec "cat /dev/urandom" -b 4096 -l 10 10.0.0.2:6666

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use netsend::config::{MemAdvice, MismatchPolicy, RttProbeConfig, TransferOptions};
use netsend::multistream::{aggregate, run_streams};
use netsend::transport::{self, Transport};
use netsend::{Config, ErrorCategory, Sender, Source, Strategy, TransferStats};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatsFormat {
    Human,
    Json,
    None,
}

#[derive(Parser, Debug)]
#[command(
    name = "netsend-tx",
    version,
    about = "netsend 송신기 - 전송 방식별 성능 측정",
    long_about = None
)]
struct Args {
    /// 수신기 주소 (TCP/UDP: host:port, unix: 소켓 경로)
    target: String,

    /// 보낼 파일 (없으면 표준 입력)
    #[arg(short = 'f', long, value_name = "PATH", conflicts_with = "exec")]
    file: Option<PathBuf>,

    /// 이 명령의 stdout을 보낸다 (sh -c)
    #[arg(long, value_name = "CMD")]
    exec: Option<String>,

    /// 트랜스포트 (tcp, udp, udplite, unix)
    #[arg(short = 't', long, default_value = "tcp", value_parser = parse_transport)]
    transport: Transport,

    /// 전송 방식 (sendfile, splice, mmap, rw)
    #[arg(short = 'm', long, default_value = "rw")]
    strategy: Strategy,

    /// 청크 크기 (0이면 전송 방식 기본값)
    #[arg(short = 'b', long, default_value_t = 0, value_name = "BYTES")]
    chunk_size: usize,

    /// 전송할 청크 수 제한 (0이면 무제한)
    #[arg(short = 'l', long, default_value_t = 0, value_name = "N")]
    limit: u64,

    /// 메모리/파일 접근 힌트 (normal, random, sequential, willneed, dontneed, noreuse)
    #[arg(long, value_name = "ADVICE")]
    advice: Option<MemAdvice>,

    /// RTT 프로브 ("10n,500d,4m" 또는 강제 값 "15f")
    #[arg(short = 'R', long, value_name = "SPEC")]
    rtt: Option<RttProbeConfig>,

    /// RTT 프로브 타임아웃 (초)
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    rtt_timeout: u64,

    /// 식별자가 다른 프로브 응답을 버린다
    #[arg(long)]
    discard_mismatched: bool,

    /// 계산한 RTT를 수신기에 알리지 않는다
    #[arg(long)]
    no_announce: bool,

    /// 병렬 스트림 수 (파일 소스만)
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
        let rtt = match &self.rtt {
            Some(requested) => RttProbeConfig {
                timeout: Duration::from_secs(self.rtt_timeout),
                announce: !self.no_announce,
                mismatch: if self.discard_mismatched {
                    MismatchPolicy::Discard
                } else {
                    MismatchPolicy::Record
                },
                ..requested.clone()
            },
            None => RttProbeConfig::disabled(),
        };

        let config = Config {
            strategy: self.strategy,
            transfer: TransferOptions {
                chunk_size: self.chunk_size,
                limit_chunks: self.limit,
                advice: self.advice,
            },
            rtt,
            transport: self.transport,
            streams: self.streams,
        };
        config.validate()?;

        if config.streams > 1 && self.file.is_none() {
            bail!(netsend::Error::InvalidConfig(
                "멀티 스트림은 파일 소스에서만 가능".into()
            ));
        }
        Ok(config)
    }

    fn open_source(&self) -> netsend::Result<Source> {
        match (&self.file, &self.exec) {
            (Some(path), _) => Source::open(path),
            (None, Some(command)) => Source::command(command),
            (None, None) => Source::stdin(),
        }
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
        StatsFormat::Human => println!("{}", stats.summary()),
        StatsFormat::Json => println!("{}", serde_json::to_string_pretty(&stats.report())?),
        StatsFormat::None => {}
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let config = args.config()?;
    info!(
        "송신 시작: {} via {} ({}, {} stream(s))",
        args.target, config.transport, config.strategy, config.streams
    );

    let sender = Sender::new(config.clone());
    let results = run_streams(config.streams, |index| {
        let mut source = args.open_source()?;
        let mut channel = transport::connect(config.transport, &args.target)?;
        let stats = sender.transmit(&mut source, &mut *channel)?;
        source.finish()?;
        info!("스트림 {}: {}", index, stats.summary());
        Ok(stats)
    });

    let summary = aggregate(results);
    if let Some((_, err)) = summary.failures.into_iter().next() {
        return Err(err.into());
    }
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
