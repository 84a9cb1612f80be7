use anyhow::Result;
use crowdcount::Controller;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::common::{Target, print_refresh_report, print_snapshot, print_upload_report, read_files};

const HELP: &str = "\
Commands:
  show                 print the table
  upload <path>...     upload images, refresh, reload
  refresh              refresh the stage and reload
  select <row>         select a row (again to deselect)
  clear                clear the selection
  detail               show the selected row
  status               show the session phase
  help                 this text
  quit                 end the session";

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Show,
    Upload(Vec<PathBuf>),
    Refresh,
    Select(usize),
    Clear,
    Detail,
    Status,
    Help,
    Quit,
}

fn parse_line(line: &str) -> Result<Option<SessionCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("show", []) => SessionCommand::Show,
        ("upload", []) => return Err("upload needs at least one path".to_string()),
        ("upload", paths) => SessionCommand::Upload(paths.iter().map(PathBuf::from).collect()),
        ("refresh", []) => SessionCommand::Refresh,
        ("select", [row]) => SessionCommand::Select(
            row.parse()
                .map_err(|_| format!("not a row number: {row}"))?,
        ),
        ("clear", []) => SessionCommand::Clear,
        ("detail", []) => SessionCommand::Detail,
        ("status", []) => SessionCommand::Status,
        ("help" | "?", []) => SessionCommand::Help,
        ("quit" | "exit", []) => SessionCommand::Quit,
        (other, _) => return Err(format!("unknown command: {other} (try help)")),
    };
    Ok(Some(command))
}

/// Line-oriented session; every failure is reported and the loop goes on
pub async fn session_command(target: &Target) -> Result<()> {
    let mut controller = target.controller()?;
    if let Err(e) = controller.ensure_stage().await {
        println!("Error creating stage: {e}");
    }
    match controller.load().await {
        Ok(_) => print_snapshot(controller.state().snapshot())?,
        Err(e) => println!("Error loading data: {e}"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("crowd> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(SessionCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = run(&mut controller, command).await {
                    println!("{e}");
                }
            }
            Err(message) => println!("{message}"),
        }
    }

    let state = controller.end();
    println!("Session ended ({} file(s) uploaded)", state.uploaded().len());
    Ok(())
}

async fn run(controller: &mut Controller, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Show => print_snapshot(controller.state().snapshot())?,
        SessionCommand::Upload(paths) => {
            let files = read_files(&paths).await;
            match controller.submit_files(&files).await {
                Some(report) => {
                    print_upload_report(&report);
                    print_snapshot(controller.state().snapshot())?;
                }
                None => println!("No new files to upload"),
            }
        }
        SessionCommand::Refresh => {
            let report = controller.manual_refresh().await;
            print_refresh_report(&report);
            if report.is_success() {
                print_snapshot(controller.state().snapshot())?;
            }
        }
        SessionCommand::Select(row) => {
            let phase = controller.select(Some(row))?;
            println!("{phase}");
            if controller.state().selection().is_some() {
                print_detail(controller).await?;
            }
        }
        SessionCommand::Clear => {
            let phase = controller.select(None)?;
            println!("{phase}");
        }
        SessionCommand::Detail => print_detail(controller).await?,
        SessionCommand::Status => {
            let state = controller.state();
            println!("Phase: {}", state.phase());
            match state.selection() {
                Some(row) => println!("Selected row: {row}"),
                None => println!("Selected row: none"),
            }
            println!("Uploaded this session: {}", state.uploaded().len());
        }
        SessionCommand::Help => println!("{HELP}"),
        SessionCommand::Quit => {}
    }
    Ok(())
}

async fn print_detail(controller: &Controller) -> Result<()> {
    match controller.detail().await? {
        Some(panel) => print!("{panel}"),
        None => println!("No row selected"),
    }
    Ok(())
}
