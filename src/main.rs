use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use cardtrain::dataset::pair_dataset;
use cardtrain::frame::Frame;
use cardtrain::observer::SessionAdapter;
use cardtrain::session::Session;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" || args[1] == "help" {
        print_help();
        return;
    }

    let result = match args[1].as_str() {
        "replay" => match args.get(2) {
            Some(path) => {
                let tail = parse_tail(&args[3..]);
                replay(Path::new(path), tail)
            }
            None => Err("replay needs a capture file".to_string()),
        },
        "pair" => {
            if args.len() < 3 {
                Err("pair needs a directory or a list of files".to_string())
            } else {
                pair(&args[2..])
            }
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("cardtrain - offline tools for training-session captures");
    println!();
    println!("Usage:");
    println!("  cardtrain replay <capture.jsonl> [--tail N]");
    println!("      Fold every frame of a WebSocket capture (one JSON frame per line)");
    println!("      into a fresh session and print the final state.");
    println!("  cardtrain pair <dir | files...>");
    println!("      Show how images and .txt annotations would be paired for upload.");
}

fn parse_tail(rest: &[String]) -> usize {
    match rest {
        [flag, n, ..] if flag == "--tail" => n.parse().unwrap_or(20),
        _ => 20,
    }
}

fn replay(path: &Path, tail: usize) -> Result<(), String> {
    let file = fs::File::open(path).map_err(|e| format!("open {:?}: {e}", path))?;
    let mut session = Session::new();
    let mut applied = 0usize;
    let mut ignored = 0usize;
    let mut malformed = 0usize;

    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("read {:?}: {e}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        match Frame::parse(&line) {
            Ok(frame) => {
                if session.apply(&frame) {
                    applied += 1;
                } else {
                    ignored += 1;
                }
            }
            Err(e) => {
                malformed += 1;
                eprintln!("line {}: {e}", n + 1);
            }
        }
    }

    let snap = SessionAdapter::new(&session).snapshot(tail);
    println!(
        "frames: applied={} ignored={} malformed={}",
        applied, ignored, malformed
    );
    println!(
        "status={:?} epoch={}/{} progress={:.1}%",
        snap.status, snap.current_epoch, snap.total_epochs, snap.progress
    );
    for (name, value) in &snap.metrics {
        println!("  {name:<10} {value}");
    }
    if let Some(err) = &snap.error {
        println!("error: {err}");
    }
    println!("log ({} lines, last {}):", snap.log_len, snap.log_tail.len());
    for line in &snap.log_tail {
        println!("  {line}");
    }
    Ok(())
}

fn pair(inputs: &[String]) -> Result<(), String> {
    let mut files: Vec<PathBuf> = Vec::new();
    for input in inputs {
        let p = PathBuf::from(input);
        if p.is_dir() {
            let entries = fs::read_dir(&p).map_err(|e| format!("read_dir {:?}: {e}", p))?;
            for entry in entries {
                let entry = entry.map_err(|e| format!("read_dir {:?}: {e}", p))?;
                files.push(entry.path());
            }
        } else {
            files.push(p);
        }
    }
    files.sort();

    let pairing = pair_dataset(&files).map_err(|e| e.to_string())?;
    for item in &pairing.items {
        match &item.annotation {
            Some(a) => println!("{}  <->  {}", item.image.display(), a.display()),
            None => println!("{}  (no annotation)", item.image.display()),
        }
    }
    println!(
        "{} images, {} with annotation, {} annotation files",
        pairing.image_count(),
        pairing.matched_count(),
        pairing.annotation_files
    );
    if !pairing.unmatched_images.is_empty() {
        println!(
            "warning: {}/{} images have no annotation",
            pairing.unmatched_images.len(),
            pairing.image_count()
        );
    }
    Ok(())
}
