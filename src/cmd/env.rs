//! Orchestration environments: `buildmachine env create|run`.

use anyhow::Result;

use super::super::{Cli, EnvCommands};
use super::multi::{MultiOptions, cmd_multi};

pub async fn cmd_env(cli: &Cli, command: &EnvCommands) -> Result<()> {
    use buildmachine::env;
    use buildmachine::ui::icons::CHECK;

    match command {
        EnvCommands::Create { env_path } => {
            let config = env::create(env_path)?;
            println!("{} Environment created: {}", CHECK, env_path.display());
            println!("  Edit {} then run `buildmachine env run --env-path {}`", config.display(), env_path.display());
        }
        EnvCommands::Run {
            env_path,
            try_image_build,
            settings,
        } => {
            let run = env::prepare_run(env_path)?;
            println!("Running environment in {}", run.exec_dir.display());
            let options = MultiOptions {
                try_image_build: *try_image_build,
                shell: false,
                settings: settings.clone(),
            };
            cmd_multi(cli, &run.config, &run.exec_dir, &options).await?;
        }
    }
    Ok(())
}
