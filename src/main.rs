use std::{env, error::Error, fs};

use tracing_subscriber::{EnvFilter, fmt};

use scramjet::bytecode::disasm::{disassemble, opcode_counts};
use scramjet::bytecode::dsl::{define_dsl, parse_literal};
use scramjet::{Engine, Module, Slot, Value};

const ENTRY: &str = "main";

struct Options {
    disasm: bool,
    stats: bool,
    trace: bool,
    image_out: Option<String>,
    load: Option<String>,
    dsl: Option<String>,
    args: Vec<String>,
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let options = match parse_options(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage();
            std::process::exit(1);
        }
    };

    init_logging(options.trace);

    if let Err(e) = run(&options) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("SCRAMJET - register bytecode evaluator");
    println!();
    println!("Usage:");
    println!("  scramjet [flags] <dsl> [args...]     Assemble, verify and run a function");
    println!("  scramjet [flags] --load <image> [args...]");
    println!();
    println!("Flags:");
    println!("  --disasm           Print the listing before running");
    println!("  --stats            Print opcode counts before running");
    println!("  --trace            Log every executed instruction");
    println!("  --image <out>      Write the assembled function as an image");
    println!("  --load <image>     Run a function from an image instead of DSL text");
    println!();
    println!("Arguments use literal syntax: i42, d2.5, T, F.");
    println!("The function takes one parameter per argument given.");
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        disasm: false,
        stats: false,
        trace: false,
        image_out: None,
        load: None,
        dsl: None,
        args: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--disasm" => options.disasm = true,
            "--stats" => options.stats = true,
            "--trace" => options.trace = true,
            "--image" => {
                let path = iter.next().ok_or("--image needs an output path")?;
                options.image_out = Some(path.clone());
            }
            "--load" => {
                let path = iter.next().ok_or("--load needs an image path")?;
                options.load = Some(path.clone());
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{}'", flag)),
            _ if options.load.is_none() && options.dsl.is_none() => {
                options.dsl = Some(arg.clone());
            }
            _ => options.args.push(arg.clone()),
        }
    }

    if options.load.is_some() {
        // Everything positional is an argument when the code comes from an image.
        if let Some(dsl) = options.dsl.take() {
            options.args.insert(0, dsl);
        }
    } else if options.dsl.is_none() {
        return Err("no program given".to_string());
    }

    Ok(options)
}

fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("scramjet=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(options: &Options) -> Result<(), Box<dyn Error>> {
    let mut engine = Engine::new();
    engine.register_callback("print", |ctx| {
        let line: Vec<String> = ctx.args().iter().map(Value::to_string).collect();
        println!("{}", line.join(" "));
        Value::Undefined
    })?;

    let values = options
        .args
        .iter()
        .map(|arg| parse_literal(arg, Some(engine.host())).map_err(|e| format!("argument '{}': {}", arg, e)))
        .collect::<Result<Vec<_>, _>>()?;

    let function = match (&options.load, &options.dsl) {
        (Some(path), _) => {
            let bytes = fs::read(path).map_err(|e| format!("failed to read '{}': {}", path, e))?;
            engine.load_image(ENTRY, &bytes)?
        }
        (None, Some(dsl)) => {
            let arg_count = Slot::try_from(values.len()).map_err(|_| "too many arguments")?;
            // The entry may call itself by name.
            let mut module = Module::new();
            let id = define_dsl(&mut module, ENTRY, dsl, arg_count, None, Some(engine.host()))?;
            let function = module.into_function(id).ok_or("assembled function missing")?;
            engine.define(ENTRY, function)?
        }
        (None, None) => return Err("no program given".into()),
    };

    if options.disasm {
        println!("{}", disassemble(&function));
    }

    if options.stats {
        println!("=== OPCODES ===");
        for (opcode, count) in opcode_counts(&function) {
            println!("{:<14} {}", opcode.mnemonic(), count);
        }
        println!();
    }

    if let Some(path) = &options.image_out {
        let bytes = engine.save_image(ENTRY)?;
        fs::write(path, &bytes).map_err(|e| format!("failed to write '{}': {}", path, e))?;
        eprintln!("wrote {} bytes to {}", bytes.len(), path);
    }

    let result = engine.run(ENTRY, &values)?;
    println!("{}", result);
    Ok(())
}
