extern crate rustyline;

use std::fs;

use alma::{LispContext, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut ctx = LispContext::new();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && &args[1] != "--" {
        let source = fs::read_to_string(&args[1])?;
        return ctx.run(&source);
    }

    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Err: {}", err);
            return Ok(());
        },
    };
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                match ctx.eval_source(&line) {
                    Ok(out) => println!("{}", out.inspect()),
                    Err(err) => println!("Err: {}", err),
                }
            },
            // eof or interrupt
            Err(_) => break Ok(()),
        }
    }
}
