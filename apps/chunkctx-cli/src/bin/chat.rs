use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chunkctx_cli::{init_tracing, load_settings, open_pipeline, print_outcome};
use chunkctx_context::SessionState;
use chunkctx_embed::get_default_embedder;

fn print_usage(report: &chunkctx_context::UsageReport) {
    println!("💰 input {} / output {} tokens, est. ${:.4}", report.input_tokens, report.output_tokens, report.estimated_cost);
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = load_settings()?;
    let args: Vec<String> = env::args().skip(1).collect();
    let session_file = args.iter().position(|a| a == "--session").and_then(|i| args.get(i + 1)).map(PathBuf::from);

    let pipeline = open_pipeline(&settings)?;
    let embedder = get_default_embedder(&settings.embedding)?;
    let mut session = match &session_file {
        Some(path) if path.exists() => SessionState::from_json(&fs::read_to_string(path)?)?,
        _ => SessionState::new(),
    };

    println!("chunkctx chat\n=============");
    println!("Type a question. `__RESET_CHAT__` clears the session, `:usage` shows token spend, `:quit` exits.");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        match query {
            "" => continue,
            ":quit" | ":q" => break,
            ":usage" => {
                print_usage(&pipeline.usage_report(&session));
                continue;
            }
            _ => {}
        }

        session = match pipeline.answer(query, &embedder, pipeline.default_token_budget(), session) {
            Ok(outcome) => {
                print_outcome(&outcome);
                outcome.session
            }
            Err(e) => {
                eprintln!("Error: {}", e.source);
                e.session
            }
        };
    }

    print_usage(&pipeline.usage_report(&session));
    if let Some(path) = session_file {
        fs::write(&path, session.to_json()?)?;
        println!("💾 Session saved to {}", path.display());
    }
    Ok(())
}
