//! wwwget - URL 기반 바이트 스트림 송수신
//!
//! 사용법:
//!   wwwget [--log-level L] get <URL> [OPTIONS]
//!   wwwget [--log-level L] put <PATH> <URL> [OPTIONS]
//!
//! 예시:
//!   # 임의 포트에서 대기, 재접속 URL은 stderr로 출력
//!   wwwget get 'udp://0.0.0.0:0?print_url=1' -o received.bin
//!
//!   # 위에서 출력된 URL로 송신
//!   wwwget put data.bin 'udp://192.168.0.10:40123'

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wwwget::{ArchiveFormat, Client, Config, ReceiveOptions};

const HELP: &str = r#"wwwget - URL 스킴 기반 바이트 스트림 송수신

사용법:
  wwwget [--log-level <LEVEL>] get <URL> [OPTIONS]
  wwwget [--log-level <LEVEL>] put <PATH> <URL> [OPTIONS]

스킴:
  http, https, file      외부 클라이언트 (GET 수신 / PUT 송신)
  ftp, ftps, sftp        백엔드 등록 시에만 사용 가능
  data:                  인라인 URL (put은 생성된 URL을 stdout에 출력)
  tcp://host:port        스트림 (수신 기본 listen, 송신 기본 connect)
  udp://host:port        ?mode=seq (기본, 신뢰 전송) | ?mode=raw
  bt://AA:BB:CC:DD:EE:FF[:채널]  RFCOMM (백엔드 필요)

URL 옵션:
  role=listen|connect, print_url=1, bind=ADDR, timeout=초,
  window=N, rto_ms=N, mtu=N, hdr_<이름>=값

get 옵션:
  -o, --output <PATH>    저장 경로 (없으면 stdout)
  --extract              받은 아카이브 풀기 (tar, tar.gz, zip)
  --extract-dir <DIR>    풀 위치
  --delete-archive       푼 뒤 아카이브 삭제
  --keep-partial         실패 시 <PATH>.part 유지

put 옵션 (디렉터리 송신):
  --format tar|zip       묶을 형식 (기본: tar)
  --compression gz       tar 압축

공통 옵션:
  --timeout <SECS>       I/O 타임아웃 (초)
  --header 'K: V'        요청 헤더 (반복 가능)
  --user-agent <UA>      User-Agent 헤더
  --log-level <LEVEL>    로그 레벨 (기본: warn, RUST_LOG 형식 허용)
  -h, --help             이 도움말 출력

종료 코드: 0 성공, 2 실패"#;

enum Command {
    Get {
        url: String,
        output: Option<PathBuf>,
        options: ReceiveOptions,
    },
    Put {
        path: PathBuf,
        url: String,
        format: ArchiveFormat,
    },
}

struct CliArgs {
    command: Command,
    log_level: String,
    timeout: Option<Duration>,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut log_level = "warn".to_string();
    let mut timeout = None;
    let mut headers = Vec::new();
    let mut user_agent = None;
    let mut output = None;
    let mut options = ReceiveOptions::default();
    let mut format = "tar".to_string();
    let mut compression = None;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--log-level" => log_level = take_value(args, &mut i, arg)?,
            "--timeout" => {
                let secs: f64 = take_value(args, &mut i, arg)?
                    .parse()
                    .ok()
                    .filter(|s: &f64| s.is_finite() && *s > 0.0)
                    .ok_or("유효한 timeout 필요")?;
                timeout = Some(Duration::from_secs_f64(secs));
            }
            "--header" => {
                let raw = take_value(args, &mut i, arg)?;
                let (name, val) = raw
                    .split_once(':')
                    .ok_or_else(|| format!("'이름: 값' 형식 필요: {}", raw))?;
                headers.push((name.trim().to_string(), val.trim().to_string()));
            }
            "--user-agent" => user_agent = Some(take_value(args, &mut i, arg)?),
            "--output" | "-o" => output = Some(PathBuf::from(take_value(args, &mut i, arg)?)),
            "--extract" => options.extract = true,
            "--extract-dir" => options.extract_dir = Some(PathBuf::from(take_value(args, &mut i, arg)?)),
            "--delete-archive" => options.keep_archive = false,
            "--keep-partial" => options.keep_partial = true,
            "--format" => format = take_value(args, &mut i, arg)?,
            "--compression" => compression = Some(take_value(args, &mut i, arg)?),
            "--help" | "-h" => return Err(String::new()),
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("알 수 없는 옵션: {}", other))
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match positional.as_slice() {
        [cmd, url] if cmd == "get" => Command::Get {
            url: url.clone(),
            output,
            options,
        },
        [cmd, path, url] if cmd == "put" => Command::Put {
            path: PathBuf::from(path),
            url: url.clone(),
            format: ArchiveFormat::from_parts(&format, compression.as_deref())?,
        },
        [] => return Err(String::new()),
        _ => return Err(format!("잘못된 인자: {}", positional.join(" "))),
    };

    Ok(CliArgs {
        command,
        log_level,
        timeout,
        headers,
        user_agent,
    })
}

fn take_value(args: &[String], i: &mut usize, name: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i).cloned().ok_or_else(|| format!("{} 값 필요", name))
}

async fn run(cli: CliArgs) -> wwwget::Result<()> {
    let mut config = Config::default();
    if let Some(timeout) = cli.timeout {
        config.io_timeout = timeout;
        config.idle_timeout_ms = timeout.as_millis().max(1) as u64;
    }

    let mut client = Client::new(config).with_announcer(|url| eprintln!("{}", url));
    for (name, value) in &cli.headers {
        client = client.with_header(name, value);
    }
    if let Some(ua) = &cli.user_agent {
        client = client.with_user_agent(ua);
    }

    match cli.command {
        Command::Get {
            url,
            output: Some(path),
            options,
        } => {
            let outcome = client.receive_to_path(&url, &path, &options).await?;
            info!("저장: {} ({} bytes)", outcome.path.display(), outcome.bytes);
            if let Some(dir) = outcome.extracted_to {
                info!("압축 해제: {}", dir.display());
            }
        }
        Command::Get {
            url, output: None, ..
        } => {
            let mut stdout = tokio::io::stdout();
            client.receive_to_writer(&url, &mut stdout).await?;
        }
        Command::Put { path, url, format } => {
            let outcome = client.with_archive_format(format).send_path(&path, &url).await?;
            if let Some(data_url) = outcome.data_url {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(data_url.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            info!("송신 완료: {:?} bytes", outcome.bytes);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) if msg.is_empty() => {
            println!("{}", HELP);
            return ExitCode::SUCCESS;
        }
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, HELP);
            return ExitCode::from(2);
        }
    };

    // 로깅 설정 (stdout은 데이터용)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("로깅 설정 실패: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("wwwget: {}", e);
            ExitCode::from(2)
        }
    }
}
