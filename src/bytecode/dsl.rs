//! Textual assembler for Scramjet bytecode.
//!
//! ```text
//! program   = [ op ( '|' op )* ]
//! op        = prefix operands
//! operands  = operand ( ',' operand )*
//! literal   = 'T' | 'F' | 'd'<double> | 'i'<int> | 'e'<callback name>
//! ```
//!
//! | prefix | instruction    | operands                 |
//! |--------|----------------|--------------------------|
//! | `A`    | Allocate       | dest                     |
//! | `Ai`   | AllocateI32    | dest                     |
//! | `Ad`   | AllocateDouble | dest                     |
//! | `S`    | Store          | x, y                     |
//! | `Si`   | StoreI32       | x, y                     |
//! | `Sd`   | StoreDouble    | x, y                     |
//! | `L`    | Load           | dest, x                  |
//! | `Li`   | LoadI32        | dest, x                  |
//! | `Ld`   | LoadDouble     | dest, x                  |
//! | `=i`   | EqI32          | dest, x, y               |
//! | `C`    | Const          | dest, literal            |
//! | `Ci`   | ConstI32       | dest, int literal        |
//! | `Cd`   | ConstDouble    | dest, double literal     |
//! | `Ei`   | ExtractI32     | dest, x                  |
//! | `Ed`   | ExtractDouble  | dest, x                  |
//! | `J`    | Jump           | offset                   |
//! | `Ii`   | IfI32          | x, offset                |
//! | `+i`   | AddI32         | dest, x, y               |
//! | `()`   | Call           | dest, name, arg...       |
//! | `R`    | Return         | x                        |
//! | `X`    | Execute        | dest, callee, arg...     |
//!
//! Example: `Ci0,i2|Ci1,i3|+i2,0,1|R2` adds two and three.
//!
//! The assembler exists for tests and tooling; it is not on any hot path.

use thiserror::Error;

use crate::bytecode::{FuncId, Instruction, Module, Opcode, Slot};
use crate::lang::value::Value;
use crate::runtime::host::HostRegistry;

/// An assembler error.
///
/// `position` is the byte offset of the offending instruction in the source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("position {position}: {message}")]
pub struct DslError {
    pub position: usize,
    pub message: String,
}

impl DslError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

// Longest prefixes first so that `Ai` is not read as `A` followed by `i`.
const PREFIXES: [(&str, Opcode); 21] = [
    ("()", Opcode::Call),
    ("Ai", Opcode::AllocateI32),
    ("Ad", Opcode::AllocateDouble),
    ("Si", Opcode::StoreI32),
    ("Sd", Opcode::StoreDouble),
    ("Li", Opcode::LoadI32),
    ("Ld", Opcode::LoadDouble),
    ("=i", Opcode::EqI32),
    ("Ci", Opcode::ConstI32),
    ("Cd", Opcode::ConstDouble),
    ("Ei", Opcode::ExtractI32),
    ("Ed", Opcode::ExtractDouble),
    ("Ii", Opcode::IfI32),
    ("+i", Opcode::AddI32),
    ("A", Opcode::Allocate),
    ("S", Opcode::Store),
    ("L", Opcode::Load),
    ("C", Opcode::Const),
    ("J", Opcode::Jump),
    ("R", Opcode::Return),
    ("X", Opcode::Execute),
];

fn split_prefix(token: &str) -> Option<(Opcode, &str)> {
    PREFIXES
        .iter()
        .find(|(prefix, _)| token.starts_with(prefix))
        .map(|(prefix, opcode)| (*opcode, &token[prefix.len()..]))
}

/// Parse a literal value.
///
/// `e<name>` needs `callbacks` to resolve the name; the message is returned
/// without a position so callers can attach their own.
pub fn parse_literal(source: &str, callbacks: Option<&HostRegistry>) -> Result<Value, String> {
    match source {
        "" => return Err("empty literal".to_string()),
        "T" => return Ok(Value::Boolean(true)),
        "F" => return Ok(Value::Boolean(false)),
        _ => {}
    }

    let mut chars = source.chars();
    let kind = chars.next().unwrap_or_default();
    let rest = chars.as_str();
    match kind {
        'd' => rest
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| format!("unable to parse double from '{}'", rest)),
        'i' => rest
            .parse::<i32>()
            .map(Value::Int32)
            .map_err(|_| format!("unable to parse integer from '{}'", rest)),
        'e' => callbacks
            .and_then(|registry| registry.lookup(rest))
            .ok_or_else(|| format!("unknown callback name '{}'", rest)),
        _ => Err(format!("unknown literal kind '{}'", kind)),
    }
}

/// Assembles instruction text against the named functions of a module and,
/// optionally, a registry of host callbacks.
pub struct Assembler<'a> {
    functions: Option<&'a Module>,
    callbacks: Option<&'a HostRegistry>,
}

impl<'a> Default for Assembler<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Assembler<'a> {
    pub fn new() -> Self {
        Self {
            functions: None,
            callbacks: None,
        }
    }

    pub fn with_functions(mut self, functions: &'a Module) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_callbacks(mut self, callbacks: &'a HostRegistry) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn assemble(&self, dsl: &str) -> Result<Vec<Instruction>, DslError> {
        let mut code = Vec::new();
        if dsl.is_empty() {
            return Ok(code);
        }

        let mut position = 0;
        for token in dsl.split('|') {
            code.push(self.assemble_one(token, position)?);
            position += token.len() + 1;
        }

        Ok(code)
    }

    fn assemble_one(&self, token: &str, pos: usize) -> Result<Instruction, DslError> {
        if token.is_empty() {
            return Err(DslError::new(pos, "empty instruction"));
        }

        let (opcode, rest) = split_prefix(token)
            .ok_or_else(|| DslError::new(pos, format!("invalid opcode '{}'", token)))?;

        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').collect()
        };

        let fail = |message: String| {
            DslError::new(
                pos,
                format!("failed to parse '{}' from '{}': {}", opcode.prefix(), token, message),
            )
        };

        let expect = |n: usize| -> Result<(), DslError> {
            if operands.len() == n {
                Ok(())
            } else {
                Err(fail(format!(
                    "expected {} operand{}, got {}",
                    n,
                    if n == 1 { "" } else { "s" },
                    operands.len()
                )))
            }
        };

        let slot = |i: usize| -> Result<Slot, DslError> {
            operands[i]
                .parse::<Slot>()
                .map_err(|_| fail(format!("invalid index '{}'", operands[i])))
        };

        let literal = |i: usize| -> Result<Value, DslError> {
            parse_literal(operands[i], self.callbacks).map_err(fail)
        };

        let op = match opcode {
            Opcode::Allocate | Opcode::AllocateI32 | Opcode::AllocateDouble => {
                expect(1)?;
                let dest = slot(0)?;
                match opcode {
                    Opcode::Allocate => Instruction::Allocate { dest },
                    Opcode::AllocateI32 => Instruction::AllocateI32 { dest },
                    _ => Instruction::AllocateDouble { dest },
                }
            }

            Opcode::Store | Opcode::StoreI32 | Opcode::StoreDouble => {
                expect(2)?;
                let (x, y) = (slot(0)?, slot(1)?);
                match opcode {
                    Opcode::Store => Instruction::Store { x, y },
                    Opcode::StoreI32 => Instruction::StoreI32 { x, y },
                    _ => Instruction::StoreDouble { x, y },
                }
            }

            Opcode::Load
            | Opcode::LoadI32
            | Opcode::LoadDouble
            | Opcode::ExtractI32
            | Opcode::ExtractDouble => {
                expect(2)?;
                let (dest, x) = (slot(0)?, slot(1)?);
                match opcode {
                    Opcode::Load => Instruction::Load { dest, x },
                    Opcode::LoadI32 => Instruction::LoadI32 { dest, x },
                    Opcode::LoadDouble => Instruction::LoadDouble { dest, x },
                    Opcode::ExtractI32 => Instruction::ExtractI32 { dest, x },
                    _ => Instruction::ExtractDouble { dest, x },
                }
            }

            Opcode::EqI32 | Opcode::AddI32 => {
                expect(3)?;
                let (dest, x, y) = (slot(0)?, slot(1)?, slot(2)?);
                if opcode == Opcode::EqI32 {
                    Instruction::EqI32 { dest, x, y }
                } else {
                    Instruction::AddI32 { dest, x, y }
                }
            }

            Opcode::Const => {
                expect(2)?;
                Instruction::Const {
                    dest: slot(0)?,
                    value: literal(1)?,
                }
            }
            Opcode::ConstI32 => {
                expect(2)?;
                let dest = slot(0)?;
                match literal(1)? {
                    Value::Int32(value) => Instruction::ConstI32 { dest, value },
                    other => {
                        return Err(fail(format!("expected int32 literal, got {}", other.type_name())));
                    }
                }
            }
            Opcode::ConstDouble => {
                expect(2)?;
                let dest = slot(0)?;
                match literal(1)? {
                    Value::Double(value) => Instruction::ConstDouble { dest, value },
                    other => {
                        return Err(fail(format!("expected double literal, got {}", other.type_name())));
                    }
                }
            }

            Opcode::Jump => {
                expect(1)?;
                Instruction::Jump { offset: slot(0)? }
            }
            Opcode::IfI32 => {
                expect(2)?;
                Instruction::IfI32 {
                    x: slot(0)?,
                    offset: slot(1)?,
                }
            }

            Opcode::Return => {
                expect(1)?;
                Instruction::Return { x: slot(0)? }
            }

            Opcode::Call => {
                if operands.len() < 2 {
                    return Err(fail("expected dest and function name".to_string()));
                }
                let dest = slot(0)?;
                let name = operands[1];
                let (id, arg_count) = self
                    .functions
                    .and_then(|module| {
                        let id = module.lookup(name)?;
                        Some((id, module.get(id)?.arg_count()))
                    })
                    .ok_or_else(|| fail(format!("unknown function name '{}'", name)))?;
                let args = (2..operands.len()).map(slot).collect::<Result<Vec<_>, _>>()?;
                if args.len() != usize::from(arg_count) {
                    return Err(fail(format!(
                        "function '{}' takes {} arguments, got {}",
                        name,
                        arg_count,
                        args.len()
                    )));
                }
                Instruction::call(dest, id, args)
            }

            Opcode::Execute => {
                if operands.len() < 2 {
                    return Err(fail("expected dest and callee slot".to_string()));
                }
                let (dest, callee) = (slot(0)?, slot(1)?);
                let args = (2..operands.len()).map(slot).collect::<Result<Vec<_>, _>>()?;
                Instruction::execute(dest, callee, args)
            }
        };

        Ok(op)
    }
}

/// Assemble `dsl`, resolving call targets by name in `functions`.
pub fn read_dsl(dsl: &str, functions: &Module) -> Result<Vec<Instruction>, DslError> {
    Assembler::new().with_functions(functions).assemble(dsl)
}

/// Declare `name` in `module`, assemble `dsl` against it and define the body.
///
/// The name is bound before assembly, so the body may call itself. Locals are
/// inferred with [`locals_needed`] unless `num_locals` is given. On error the
/// module is left as it was.
pub fn define_dsl(
    module: &mut Module,
    name: &str,
    dsl: &str,
    arg_count: Slot,
    num_locals: Option<Slot>,
    callbacks: Option<&HostRegistry>,
) -> Result<FuncId, DslError> {
    let mark = module.len();
    let id = module
        .declare(name, arg_count)
        .map_err(|e| DslError::new(0, e.to_string()))?;

    let mut assembler = Assembler::new().with_functions(module);
    if let Some(callbacks) = callbacks {
        assembler = assembler.with_callbacks(callbacks);
    }

    let defined = assembler.assemble(dsl).and_then(|code| {
        let locals = num_locals.unwrap_or_else(|| locals_needed(&code, arg_count));
        module
            .define(id, code, locals)
            .map_err(|e| DslError::new(0, e.to_string()))
    });

    match defined {
        Ok(()) => Ok(id),
        Err(e) => {
            module.truncate(mark);
            Err(e)
        }
    }
}

/// Number of locals `code` needs beyond `arg_count`: one past the highest
/// frame-relative slot it mentions, minus the parameters.
///
/// Call arguments are absolute indices and are not counted.
pub fn locals_needed(code: &[Instruction], arg_count: Slot) -> Slot {
    let mut highest: Option<Slot> = None;
    let mut see = |slot: Slot| highest = Some(highest.map_or(slot, |h| h.max(slot)));

    for op in code {
        op.dest().into_iter().chain(op.x()).chain(op.y()).for_each(&mut see);
        if let Instruction::Execute { args, .. } = op {
            args.iter().copied().for_each(&mut see);
        }
    }

    match highest {
        Some(h) => h.saturating_add(1).saturating_sub(arg_count),
        None => 0,
    }
}
