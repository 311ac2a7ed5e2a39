//! Plain-text dumps of lowered units, for tests and tooling.

use crate::instr::{CallType, HelperMethod, Instr};
use crate::operand::{JumpKind, Operand, Variable};
use crate::scope::ExecutableUnit;
use lapis_syntax::Interner;
use std::fmt::Write;

fn fmt_var(v: &Variable, interner: &Interner) -> String {
    match v {
        Variable::Temp { id } => format!("%t{id}"),
        Variable::Local { name, depth } => {
            if *depth == 0 {
                format!("%{}", interner.resolve(*name))
            } else {
                format!("%{}@{}", interner.resolve(*name), depth)
            }
        }
    }
}

fn fmt_operand(op: &Operand, interner: &Interner) -> String {
    match op {
        Operand::Nil => "nil".to_string(),
        Operand::True => "true".to_string(),
        Operand::False => "false".to_string(),
        Operand::SelfRef => "self".to_string(),
        Operand::Unreachable => "<unreachable>".to_string(),
        Operand::Int(v) => v.to_string(),
        Operand::Str(s) => format!("\"{}\"", interner.resolve(*s)),
        Operand::Sym(s) => format!(":{}", interner.resolve(*s)),
        Operand::Const(s) => interner.resolve(*s).to_string(),
        Operand::Var(v) => fmt_var(v, interner),
        Operand::Closure(id) => format!("closure({id})"),
        Operand::JumpError(kind) => {
            let kind = match kind {
                JumpKind::Break => "break",
                JumpKind::Next => "next",
                JumpKind::Redo => "redo",
                JumpKind::Retry => "retry",
                JumpKind::Return => "return",
            };
            format!("jump_error({kind})")
        }
    }
}

/// Render one instruction.
pub fn format_instr(instr: &Instr, interner: &Interner) -> String {
    match instr {
        Instr::Nop => "nop".to_string(),
        Instr::Label { label } => format!("{label}:"),
        Instr::Jump { target } => format!("jump {target}"),
        Instr::BranchTrue { value, target } => {
            format!("b_true {}, {target}", fmt_operand(value, interner))
        }
        Instr::BranchFalse { value, target } => {
            format!("b_false {}, {target}", fmt_operand(value, interner))
        }
        Instr::Copy { dst, src } => {
            format!("{} = {}", fmt_var(dst, interner), fmt_operand(src, interner))
        }
        Instr::LineNum { line, coverage } => {
            if *coverage {
                format!("line {line} (coverage)")
            } else {
                format!("line {line}")
            }
        }
        Instr::ThreadPoll => "thread_poll".to_string(),
        Instr::Call {
            result,
            call_type,
            name,
            receiver,
            args,
            block,
        } => {
            let mut out = format!(
                "{} = call{} {}.{}(",
                fmt_var(result, interner),
                if *call_type == CallType::Functional { " fn" } else { "" },
                fmt_operand(receiver, interner),
                interner.resolve(*name),
            );
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&fmt_operand(a, interner));
            }
            out.push(')');
            if let Some(b) = block {
                let _ = write!(out, " &{}", fmt_operand(b, interner));
            }
            out
        }
        Instr::RuntimeHelper {
            result,
            helper,
            args,
        } => {
            let name = match helper {
                HelperMethod::HandlePropagatedBreak => "handle_propagated_break",
                HelperMethod::HandleNonlocalReturn => "handle_nonlocal_return",
                HelperMethod::HandleBreakAndReturnsInLambda => "handle_break_and_returns_in_lambda",
            };
            let mut out = format!("{} = helper {name}(", fmt_var(result, interner));
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&fmt_operand(a, interner));
            }
            out.push(')');
            out
        }
        Instr::Return { value } => format!("return {}", fmt_operand(value, interner)),
        Instr::NonlocalReturn { value, method } => match method {
            Some(m) => format!("nonlocal_return {} -> {m}", fmt_operand(value, interner)),
            None => format!("nonlocal_return {} -> ?", fmt_operand(value, interner)),
        },
        Instr::BreakJump { value, scope } => {
            format!("break {} -> {scope}", fmt_operand(value, interner))
        }
        Instr::CheckForLje { defined_in_method } => {
            format!("check_lje defined_in_method={defined_in_method}")
        }
        Instr::ExcRegionStart { handler } => format!("region_start -> {handler}"),
        Instr::ExcRegionEnd => "region_end".to_string(),
        Instr::ReceiveException { result } => {
            format!("{} = receive_exception", fmt_var(result, interner))
        }
        Instr::ReceiveUnwind { result } => {
            format!("{} = receive_unwind", fmt_var(result, interner))
        }
        Instr::Throw { value } => format!("throw {}", fmt_operand(value, interner)),
        Instr::RescueEqq {
            result,
            test,
            value,
        } => format!(
            "{} = rescue_eqq {}, {}",
            fmt_var(result, interner),
            fmt_operand(test, interner),
            fmt_operand(value, interner)
        ),
        Instr::ToggleBacktrace { required } => format!("toggle_backtrace {required}"),
        Instr::GetGlobal { result, name } => format!(
            "{} = get_global {}",
            fmt_var(result, interner),
            interner.resolve(*name)
        ),
        Instr::PutGlobal { name, value } => format!(
            "put_global {}, {}",
            interner.resolve(*name),
            fmt_operand(value, interner)
        ),
        Instr::ReceiveArg { result, index } => {
            format!("{} = receive_arg {index}", fmt_var(result, interner))
        }
        Instr::DefineMethod { name, body } => {
            format!("define_method {} {body}", interner.resolve(*name))
        }
        Instr::DefineModule { result, name, body } => format!(
            "{} = define_module {} {body}",
            fmt_var(result, interner),
            interner.resolve(*name)
        ),
        Instr::RecordEndBlock { closure } => format!("record_end_block {closure}"),
        Instr::ReturnOrRethrowSavedExc { value } => {
            format!("return_or_rethrow {}", fmt_operand(value, interner))
        }
    }
}

/// Render a unit, one instruction per line with indices.
pub fn format_unit(unit: &ExecutableUnit, interner: &Interner) -> String {
    let mut out = String::new();
    for (i, instr) in unit.instrs.iter().enumerate() {
        let _ = writeln!(out, "{i:4}  {}", format_instr(instr, interner));
    }
    let _ = writeln!(out, "      ; temps: {}", unit.temp_count);
    out
}
