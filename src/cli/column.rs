//! `boardsync column` - column mutations through the optimistic gateway.

use crate::cli::{emit_record, CliContext, ColumnCommands};
use crate::engine::BoardEngine;
use crate::error::Result;
use crate::file_board::FileBoard;
use crate::gateway::{self, NewColumn, RemoteBoard};

pub(crate) fn run(ctx: &CliContext, command: ColumnCommands) -> Result<()> {
    let board = FileBoard::open(&ctx.dir)?;
    let mut engine = BoardEngine::new(ctx.user.clone());
    engine.set_project(&ctx.project);
    engine.seed_columns(board.fetch_columns(&ctx.project)?);

    match command {
        ColumnCommands::Add { name, order } => {
            let column = gateway::create_column(&mut engine, &board, NewColumn { name, order })?;
            emit_record(
                ctx,
                &format!(
                    "Created column {} ({}) at order {}",
                    column.id, column.name, column.order
                ),
                &column,
            )
        }
        ColumnCommands::Rm { id } => {
            let removed = gateway::soft_delete_column(&mut engine, &board, &id)?;
            emit_record(
                ctx,
                &format!("Deleted column {} ({})", removed.id, removed.name),
                &removed,
            )
        }
        ColumnCommands::Move { id, order } => {
            let column = gateway::move_column(&mut engine, &board, &id, order)?;
            emit_record(
                ctx,
                &format!("Moved column {} to order {}", column.id, column.order),
                &column,
            )
        }
    }
}
