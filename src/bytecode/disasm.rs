use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::bytecode::{FuncId, Function, Instruction, Opcode};

/// Disassemble `function` and every function it calls.
///
/// Functions are labelled by name. An anonymous entry is `main`; anonymous
/// callees are shown by id (`fn#3`).
pub fn disassemble(function: &Function) -> String {
    let functions = collect_functions(function);
    let labels: HashMap<FuncId, String> = functions
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let label = match f.name() {
                Some(name) => name.to_string(),
                None if i == 0 => "main".to_string(),
                None => f.id().to_string(),
            };
            (f.id(), label)
        })
        .collect();

    let mut output = String::new();
    for f in &functions {
        let label = labels.get(&f.id()).cloned().unwrap_or_else(|| f.id().to_string());
        output.push_str("════════════════════════════════════════\n");
        let _ = writeln!(output, " {}", label);
        if !f.is_defined() {
            output.push_str(" (declared, not defined)\n");
        }
        let _ = writeln!(
            output,
            " {} instructions, {} args, {} locals",
            f.len(),
            f.arg_count(),
            f.num_locals()
        );
        output.push_str("════════════════════════════════════════\n");
        output.push_str(&disassemble_ops(f.code(), &labels));
        output.push('\n');
    }
    output
}

/// Return the listing of one instruction sequence.
///
/// `labels` maps callee ids to display names; unlabelled callees are shown
/// by id.
pub fn disassemble_ops(ops: &[Instruction], labels: &HashMap<FuncId, String>) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(ops);

    for (ip, op) in ops.iter().enumerate() {
        if jump_targets.contains(&ip) {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        let _ = write!(output, "{:04} ", ip);

        if jump_targets.contains(&ip) {
            output.push_str("► ");
        } else {
            output.push_str("  ");
        }

        output.push_str(&format_op(op, labels));
        output.push('\n');
    }

    output
}

fn collect_jump_targets(ops: &[Instruction]) -> Vec<usize> {
    let mut targets = Vec::new();

    for op in ops {
        if let Some(offset) = op.offset() {
            let target = usize::from(offset);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    targets
}

/// `entry` and the functions reachable from it, in the order first reached.
/// Calls to ids missing from the module are skipped.
fn collect_functions(entry: &Function) -> Vec<Function> {
    let mut seen = HashSet::from([entry.id()]);
    let mut functions = vec![entry.clone()];
    let mut i = 0;

    while i < functions.len() {
        let callees: Vec<FuncId> = functions[i]
            .code()
            .iter()
            .filter_map(Instruction::function)
            .collect();
        for id in callees {
            if seen.insert(id) {
                if let Some(callee) = entry.callee(id) {
                    functions.push(callee);
                }
            }
        }
        i += 1;
    }

    functions
}

fn format_op(op: &Instruction, labels: &HashMap<FuncId, String>) -> String {
    let name = op.opcode().mnemonic();

    match op {
        Instruction::Allocate { dest }
        | Instruction::AllocateI32 { dest }
        | Instruction::AllocateDouble { dest } => format!("{:<12}r{}", name, dest),

        Instruction::Store { x, y }
        | Instruction::StoreI32 { x, y }
        | Instruction::StoreDouble { x, y } => format!("{:<12}[r{}] <- r{}", name, x, y),

        Instruction::Load { dest, x }
        | Instruction::LoadI32 { dest, x }
        | Instruction::LoadDouble { dest, x } => format!("{:<12}r{} <- [r{}]", name, dest, x),

        Instruction::ExtractI32 { dest, x } | Instruction::ExtractDouble { dest, x } => {
            format!("{:<12}r{} <- r{}", name, dest, x)
        }

        Instruction::EqI32 { dest, x, y } | Instruction::AddI32 { dest, x, y } => {
            format!("{:<12}r{} <- r{}, r{}", name, dest, x, y)
        }

        Instruction::Const { dest, .. }
        | Instruction::ConstI32 { dest, .. }
        | Instruction::ConstDouble { dest, .. } => match op.value() {
            Some(v) => format!("{:<12}r{} <- {}", name, dest, v),
            None => format!("{:<12}r{}", name, dest),
        },

        Instruction::Jump { offset } => format!("{:<12}→ {:04}", name, offset),
        Instruction::IfI32 { x, offset } => format!("{:<12}r{} → {:04}", name, x, offset),

        Instruction::Call {
            dest,
            function,
            args,
        } => {
            let callee = labels
                .get(function)
                .cloned()
                .unwrap_or_else(|| function.to_string());
            let args: Vec<String> = args.iter().map(|a| format!("@{}", a)).collect();
            format!("{:<12}r{} <- {}({})", name, dest, callee, args.join(", "))
        }

        Instruction::Execute { dest, callee, args } => {
            let args: Vec<String> = args.iter().map(|a| format!("r{}", a)).collect();
            format!("{:<12}r{} <- r{}({})", name, dest, callee, args.join(", "))
        }

        Instruction::Return { x } => format!("{:<12}r{}", name, x),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Instruction frequency over `function` and its callees, most frequent first.
pub fn opcode_counts(function: &Function) -> Vec<(Opcode, usize)> {
    let mut counts: HashMap<Opcode, usize> = HashMap::new();

    for f in collect_functions(function) {
        for op in f.code() {
            *counts.entry(op.opcode()).or_insert(0) += 1;
        }
    }

    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.mnemonic().cmp(b.0.mnemonic())));
    counts
}
