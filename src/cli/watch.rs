//! `boardsync watch` - mirror a project and stream change notifications.
//!
//! Notices are printed as JSON lines so other tooling can consume the
//! stream; run with two terminals (one `watch`, one issuing `task`/`column`
//! mutations) to see reconciliation live.

use std::time::Duration;

use serde::Serialize;

use crate::cli::CliContext;
use crate::engine::BoardEngine;
use crate::error::Result;
use crate::file_board::FileBoard;
use crate::gateway::RemoteBoard;
use crate::notify::ChangeNotice;

pub const NOTICE_SCHEMA_VERSION: &str = "boardsync.notice.v1";

const POLL_INTERVAL_MS: u64 = 500;

#[derive(Serialize)]
struct NoticeLine<'a, T> {
    schema_version: &'static str,
    entity: &'static str,
    #[serde(flatten)]
    notice: &'a ChangeNotice<T>,
}

fn print_notice<T: Serialize>(entity: &'static str, notice: &ChangeNotice<T>) {
    let line = NoticeLine {
        schema_version: NOTICE_SCHEMA_VERSION,
        entity,
        notice,
    };
    match serde_json::to_string(&line) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("error: failed to encode notice: {err}"),
    }
}

pub(crate) fn run(ctx: &CliContext, events: Option<usize>) -> Result<()> {
    let board = FileBoard::open(&ctx.dir)?;

    let mut engine = BoardEngine::new(ctx.user.clone());
    engine.set_project(&ctx.project);
    engine.seed_columns(board.fetch_columns(&ctx.project)?);
    engine.seed_tasks(board.fetch_tasks(&ctx.project)?);

    engine.on_task_change(|notice| print_notice("task", notice));
    engine.on_column_change(|notice| print_notice("column", notice));

    engine.start(&board, &ctx.project)?;
    if !ctx.json {
        eprintln!(
            "watching project {} ({} tasks, {} columns)",
            ctx.project,
            engine.tasks().len(),
            engine.columns().len()
        );
    }

    let mut seen = 0usize;
    loop {
        seen += engine.poll(Duration::from_millis(POLL_INTERVAL_MS));
        if let Some(limit) = events {
            if seen >= limit {
                break;
            }
        }
    }

    engine.stop();
    Ok(())
}
