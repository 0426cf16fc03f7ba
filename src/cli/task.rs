//! `boardsync task` - task mutations through the optimistic gateway.

use crate::cli::{emit_record, CliContext, TaskCommands};
use crate::engine::BoardEngine;
use crate::error::{Error, Result};
use crate::file_board::FileBoard;
use crate::gateway::{self, NewTask, RemoteBoard};

pub(crate) fn run(ctx: &CliContext, command: TaskCommands) -> Result<()> {
    let board = FileBoard::open(&ctx.dir)?;
    let mut engine = BoardEngine::new(ctx.user.clone());
    engine.set_project(&ctx.project);
    engine.seed_columns(board.fetch_columns(&ctx.project)?);
    engine.seed_tasks(board.fetch_tasks(&ctx.project)?);

    match command {
        TaskCommands::Add {
            title,
            description,
            status,
        } => {
            let status = match status {
                Some(status) => status,
                None => first_column(&engine)?,
            };
            let task = gateway::create_task(
                &mut engine,
                &board,
                NewTask {
                    title,
                    description,
                    status,
                },
            )?;
            emit_record(
                ctx,
                &format!("Created task {} ({})", task.id, task.title),
                &task,
            )
        }
        TaskCommands::Rm { id } => {
            let removed = gateway::soft_delete_task(&mut engine, &board, &id)?;
            emit_record(
                ctx,
                &format!("Deleted task {} ({})", removed.id, removed.title),
                &removed,
            )
        }
        TaskCommands::Move { id, status } => {
            let task = gateway::move_task(&mut engine, &board, &id, &status)?;
            emit_record(
                ctx,
                &format!("Moved task {} to {}", task.id, task.status),
                &task,
            )
        }
    }
}

fn first_column(engine: &BoardEngine) -> Result<String> {
    engine
        .columns()
        .first()
        .map(|column| column.id.clone())
        .ok_or_else(|| {
            Error::InvalidArgument(
                "board has no columns; run `boardsync init` or pass --status".to_string(),
            )
        })
}
