//! `boardsync init` - create the board and a project's default columns.

use crate::cli::{emit_record, CliContext};
use crate::engine::BoardEngine;
use crate::error::{Error, Result};
use crate::file_board::FileBoard;
use crate::gateway::{self, RemoteBoard};

pub(crate) fn run(ctx: &CliContext) -> Result<()> {
    let board = FileBoard::create(&ctx.dir)?;

    let mut engine = BoardEngine::new(ctx.user.clone());
    engine.set_project(&ctx.project);
    engine.seed_columns(board.fetch_columns(&ctx.project)?);
    if !engine.columns().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "project {} already has columns",
            ctx.project
        )));
    }

    let created = gateway::init_project_columns(&mut engine, &board, &ctx.config.columns.defaults)?;
    let names: Vec<&str> = created.iter().map(|column| column.name.as_str()).collect();
    emit_record(
        ctx,
        &format!(
            "Initialized board {} for project {} with columns: {}",
            ctx.dir.display(),
            ctx.project,
            names.join(", ")
        ),
        &created,
    )
}
