//! CLI client for the `cardtraind` daemon.
//!
//! Examples:
//!   cardtrain-cli status
//!   cardtrain-cli login admin secret
//!   cardtrain-cli upload ./dataset
//!   cardtrain-cli start --epochs 10 --batch 8
//!   cardtrain-cli log
//!   cardtrain-cli stop
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use cardtrain::config::TrainingConfig;
use cardtrain::ipc::{Request, Response, DEFAULT_IPC_ADDR};
use cardtrain::observer::SessionSnapshot;
use cardtrain::records::{ExtractedCard, ModelType};

const SHORT_TIMEOUT: Duration = Duration::from_secs(5);
const LONG_TIMEOUT: Duration = Duration::from_secs(600);

fn usage() -> ! {
    eprintln!("cardtrain-cli (talks to cardtraind @ {DEFAULT_IPC_ADDR} by default)");
    eprintln!("Usage: cardtrain-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  status [--tail N]            Show training session state");
    eprintln!("  log                          Print the full training log");
    eprintln!("  reconnect | disconnect       Control the training socket");
    eprintln!("  login <user> <password>      Log in and store the token");
    eprintln!("  logout | whoami              Clear / show stored credentials");
    eprintln!("  start [options]              Start training (REST)");
    eprintln!("  ws-start [options]           Start training (socket)");
    eprintln!("      --epochs N --batch N --lr F --name S --dataset PATH --weights PATH");
    eprintln!("  stop | ws-stop               Stop training (REST / socket)");
    eprintln!("  upload <dir | files...>      Pair and upload a YOLO dataset");
    eprintln!("  weights <file>               Upload pretrained weights");
    eprintln!("  delete-dataset               Delete the uploaded dataset");
    eprintln!("  extract <image> [yolo|ocr]   Extract card fields from an image");
    eprintln!("  save-card <json> [userId]    Save extracted card fields");
    eprintln!("  metrics                      Fetch card-zone training metrics");
    eprintln!("  download <output>            Download the trained model");
    eprintln!("  shutdown                     Stop the daemon");
    process::exit(1);
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = DEFAULT_IPC_ADDR.to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn parse_training_config(opts: &[String]) -> TrainingConfig {
    let mut cfg = TrainingConfig::default();
    let mut it = opts.iter();
    while let Some(flag) = it.next() {
        let value = it
            .next()
            .unwrap_or_else(|| fail(&format!("{flag} needs a value")));
        match flag.as_str() {
            "--epochs" => {
                cfg.epochs = value
                    .parse()
                    .unwrap_or_else(|_| fail("--epochs must be a number (1-100)"))
            }
            "--batch" => {
                cfg.batch_size = value
                    .parse()
                    .unwrap_or_else(|_| fail("--batch must be a number (1-64)"))
            }
            "--lr" => {
                cfg.learning_rate = value
                    .parse()
                    .unwrap_or_else(|_| fail("--lr must be a number (0.0001-0.1)"))
            }
            "--name" => cfg.model_name = value.clone(),
            "--dataset" => cfg.dataset_path = value.clone(),
            "--weights" => cfg.pretrained_weight_path = Some(value.clone()),
            other => fail(&format!("unknown option {other}")),
        }
    }
    if let Err(e) = cfg.validate() {
        fail(&e.to_string());
    }
    cfg
}

/// The daemon runs elsewhere; hand it absolute paths.
fn absolute(path: &str) -> PathBuf {
    let p = Path::new(path);
    std::fs::canonicalize(p).unwrap_or_else(|e| fail(&format!("{path}: {e}")))
}

/// Directories are expanded one level; files pass through.
fn dataset_files(inputs: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        let path = absolute(input);
        if path.is_dir() {
            let entries =
                std::fs::read_dir(&path).unwrap_or_else(|e| fail(&format!("{input}: {e}")));
            files.extend(entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()));
        } else {
            files.push(path);
        }
    }
    files.sort();
    files
}

fn send_request(addr: &str, req: &Request, timeout: Duration) -> Result<Response, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);

    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))?;

    let mut resp_line = String::new();
    reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    serde_json::from_str(&resp_line).map_err(|e| format!("parse response: {e}"))
}

fn print_state(s: SessionSnapshot) {
    println!(
        "status={:?} socket={} epoch={}/{} progress={:.1}%",
        s.status,
        if s.connected { "connected" } else { "disconnected" },
        s.current_epoch,
        s.total_epochs,
        s.progress,
    );
    if !s.metrics.is_empty() {
        let metrics: Vec<String> = s
            .metrics
            .iter()
            .map(|(k, v)| format!("{k}={v:.4}"))
            .collect();
        println!("metrics: {}", metrics.join(" "));
    }
    if let Some(err) = &s.error {
        println!("error: {err}");
    }
    println!("log: {} lines", s.log_len);
    for line in &s.log_tail {
        println!("  {line}");
    }
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];
    let mut timeout = SHORT_TIMEOUT;

    let req = match cmd.as_str() {
        "status" => {
            let log_tail = match args.get(1).map(String::as_str) {
                Some("--tail") => args
                    .get(2)
                    .and_then(|n| n.parse().ok())
                    .unwrap_or_else(|| fail("--tail must be a number")),
                _ => 20,
            };
            Request::GetState { log_tail }
        }
        "log" => Request::GetLog,
        "reconnect" => Request::Reconnect,
        "disconnect" => Request::Disconnect,
        "login" => {
            if args.len() < 3 {
                usage();
            }
            timeout = LONG_TIMEOUT;
            Request::Login {
                username: args[1].clone(),
                password: args[2].clone(),
            }
        }
        "logout" => Request::Logout,
        "whoami" => Request::WhoAmI,
        "start" => {
            timeout = LONG_TIMEOUT;
            Request::StartTraining {
                config: parse_training_config(&args[1..]),
            }
        }
        "ws-start" => Request::StartTrainingWs {
            config: parse_training_config(&args[1..]),
        },
        "stop" => {
            timeout = LONG_TIMEOUT;
            Request::StopTraining
        }
        "ws-stop" => Request::StopTrainingWs,
        "upload" => {
            if args.len() < 2 {
                usage();
            }
            timeout = LONG_TIMEOUT;
            Request::UploadDataset {
                paths: dataset_files(&args[1..]),
            }
        }
        "weights" => {
            if args.len() < 2 {
                usage();
            }
            timeout = LONG_TIMEOUT;
            Request::UploadWeights {
                path: absolute(&args[1]),
            }
        }
        "delete-dataset" => Request::DeleteDataset,
        "extract" => {
            if args.len() < 2 {
                usage();
            }
            let model_type: ModelType = match args.get(2) {
                Some(m) => m.parse().unwrap_or_else(|e: String| fail(&e)),
                None => ModelType::default(),
            };
            timeout = LONG_TIMEOUT;
            Request::Extract {
                path: absolute(&args[1]),
                model_type,
            }
        }
        "save-card" => {
            if args.len() < 2 {
                usage();
            }
            let text = std::fs::read_to_string(&args[1])
                .unwrap_or_else(|e| fail(&format!("{}: {e}", args[1])));
            let card: ExtractedCard = serde_json::from_str(&text)
                .unwrap_or_else(|e| fail(&format!("{}: {e}", args[1])));
            let user_id = match args.get(2) {
                Some(id) => id
                    .parse()
                    .unwrap_or_else(|_| fail("userId must be a number")),
                None => 1,
            };
            Request::SaveIdCard { card, user_id }
        }
        "metrics" => Request::GetCardZoneMetrics,
        "download" => {
            if args.len() < 2 {
                usage();
            }
            timeout = LONG_TIMEOUT;
            let output = std::env::current_dir()
                .map(|d| d.join(&args[1]))
                .unwrap_or_else(|_| PathBuf::from(&args[1]));
            Request::DownloadModel { output }
        }
        "shutdown" => Request::Shutdown,
        _ => usage(),
    };

    match send_request(&addr, &req, timeout) {
        Ok(Response::State(s)) => print_state(s),
        Ok(Response::Log { lines }) => {
            for line in lines {
                println!("{line}");
            }
        }
        Ok(Response::Success { message }) => println!("{message}"),
        Ok(Response::Data { value }) => match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        },
        Ok(Response::Error { message }) => {
            eprintln!("Error: {message}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed: {e}");
            process::exit(1);
        }
    }
}
