use std::path::PathBuf;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use bptree::tree::{BPlusTree, DEFAULT_ORDER, Key};
use bptree::{ingest, viz};

/// B+ tree driver: load keys from a file, render the tree as Graphviz
/// DOT, or work on it interactively
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Tree order (max children per internal node, >= 3)
    #[arg(short, long, default_value_t = DEFAULT_ORDER)]
    order: usize,

    /// File of comma-separated integer keys to insert up front
    /// (each key is inserted with itself as value)
    #[arg(short, long)]
    load: Option<PathBuf>,

    /// Write a DOT rendering of the tree to this path and exit
    #[arg(long)]
    dot: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree: BPlusTree<Key> = BPlusTree::new(cli.order)?;

    if let Some(path) = &cli.load {
        let keys = ingest::read_keys_from_path(path)?;
        let count = keys.len();
        for key in keys {
            tree.insert(key, key)?;
        }
        println!("Loaded {count} keys from {}", path.display());
    }

    if let Some(path) = &cli.dot {
        viz::write_dot(&tree, path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    repl(&mut tree)
}

fn repl(tree: &mut BPlusTree<Key>) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "B+ tree of order {} ({} values). Commands: INSERT <key> [value], GET <key>, DELETE <key>, KEYS, DOT <path>, EXIT",
        tree.order(),
        tree.len()
    );

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("bptree> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or("").to_uppercase();
        let args: Vec<&str> = parts.collect();

        match cmd.as_str() {
            "INSERT" => match parse_key(&args) {
                Some(key) => {
                    let value = args.get(1).and_then(|v| v.parse::<Key>().ok()).unwrap_or(key);
                    match tree.insert(key, value) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERROR: {e}"),
                    }
                }
                None => println!("ERROR: INSERT requires an integer key"),
            },

            "GET" => match parse_key(&args) {
                Some(key) => match tree.retrieve(key) {
                    Some(bucket) => println!("{bucket:?}"),
                    None => println!("NULL"),
                },
                None => println!("ERROR: GET requires an integer key"),
            },

            "DELETE" => match parse_key(&args) {
                Some(key) => match tree.delete(key) {
                    Ok(bucket) => println!("Removed {} value(s)", bucket.len()),
                    Err(e) => println!("ERROR: {e}"),
                },
                None => println!("ERROR: DELETE requires an integer key"),
            },

            "KEYS" => {
                let mut keys = Vec::new();
                let mut current = tree.first_leaf();
                while let Some(id) = current {
                    match tree.leaf(id) {
                        Some(leaf) => {
                            keys.extend(leaf.keys.iter().copied());
                            current = leaf.next;
                        }
                        None => break,
                    }
                }
                println!("{keys:?}");
            }

            "DOT" => match args.first() {
                Some(path) => match viz::write_dot(tree, path) {
                    Ok(()) => println!("Wrote {path}"),
                    Err(e) => println!("ERROR: {e}"),
                },
                None => println!("ERROR: DOT requires an output path"),
            },

            "EXIT" | "QUIT" => break,

            _ => println!("ERROR: command '{cmd}' not handled"),
        }
    }

    Ok(())
}

fn parse_key(args: &[&str]) -> Option<Key> {
    args.first()?.parse::<Key>().ok()
}
