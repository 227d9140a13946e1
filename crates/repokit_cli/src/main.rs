//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open the configured database, seed demo members, print one DTO page.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `repokit [config.json]`

use log::info;
use repokit_core::{
    init_from_config, MemberService, PageParams, RepoConfig, UnitOfWork,
};
use std::error::Error;
use std::process::ExitCode;

const SEED_MEMBERS: u32 = 100;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("repokit: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => RepoConfig::from_json_file(path)?,
        None => RepoConfig::default(),
    };
    init_from_config(&config)?;
    println!("repokit_core version={}", repokit_core::core_version());

    let backend = config.open_backend()?;
    let uow = UnitOfWork::with_hooks(&backend, config.hook_pipeline());
    let page = {
        let service = MemberService::new(&uow, &config);
        service.seed_members(SEED_MEMBERS)?;
        service.list_member_dtos(&PageParams::default())?
    };
    uow.commit()?;
    info!(
        "event=cli_smoke module=cli status=ok seeded={SEED_MEMBERS} page_rows={}",
        page.number_of_elements()
    );

    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}
