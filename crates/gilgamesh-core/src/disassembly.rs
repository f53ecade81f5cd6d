//! Bidirectional textual projection of one (or every) [`Subroutine`] in a
//! [`Log`]: [`render`] turns the log's facts about a subroutine into an
//! ordered [`Token`] stream a human can read; [`Disassembly::diff_edit`]
//! tokenizes edited text and zip-pairs it against the original stream to
//! recover exactly the changes a human is allowed to make (comments, label
//! renames, assertions) while rejecting anything else as a
//! [`GilgameshError::ParserError`].
//!
//! Rendering and parsing share one line grammar, so this module is the only
//! place either direction is defined — there is no separate "writer" and
//! "reader" to keep in sync.

use std::collections::HashMap;

use crate::error::GilgameshError;
use crate::log::Log;
use crate::rom::{Addr, Rom};
use crate::state::StateChange;

/// The kind of one rendered token, per spec §4.6.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TokenKind {
    /// End of a rendered line.
    Newline,
    /// A subroutine or local label declaration (`name:` / `.name:`).
    Label,
    /// An instruction mnemonic.
    Operation,
    /// An instruction operand that is not a resolved label reference.
    Operand,
    /// An instruction operand that resolves to a label (local or
    /// subroutine), rendered as that label's name instead of a bare address.
    OperandLabel,
    /// The `$XXXXXX` program-counter field of an instruction line.
    Pc,
    /// A user comment attached to a pc.
    Comment,
    /// Marker that an instruction's stack effect broke call/return
    /// discipline.
    StackManipulation,
    /// A `StateChange` header line sourced from a user assertion.
    AssertedState,
    /// A `StateChange` header line the symbolic CPU determined exactly.
    KnownState,
    /// A `StateChange` header line the symbolic CPU could not determine.
    UnknownState,
    /// Header introducing a jump table's resolved entries.
    JumpTable,
    /// One `[index] -> target` entry under a `JUMP_TABLE` header.
    JumpTableEntry,
    /// A fixed separator line between subroutines in a ROM-level rendering.
    SeparatorLine,
    /// The processor state execution is assumed to begin a subroutine in
    /// (only rendered for declared entry points).
    LastKnownState,
    /// `"none"` / `"instruction"` / `"subroutine"`: what kind of assertion,
    /// if any, is in force at the paired [`TokenKind::Assertion`]'s pc.
    AssertionType,
    /// The `StateChange` expression of an assertion (or `"none"`).
    Assertion,
}

/// One token of a rendered/parsed disassembly.
///
/// Equality (and therefore round-trip comparison) ignores `highlighted` and
/// `jump_table_colored`: spec §4.6 calls these "equivalent tokens" — purely
/// cosmetic rendering variants that carry no information the parser needs.
#[derive(Debug, Clone)]
pub struct Token {
    /// What this token represents.
    pub kind: TokenKind,
    /// Its literal text, exactly as it would render (or did parse).
    pub text: String,
    /// The instruction pc this token belongs to, if any. `None` for
    /// `NEWLINE`, `SEPARATOR_LINE`, and a subroutine's own header `LABEL`.
    pub pc: Option<Addr>,
    /// Cosmetic: render this token highlighted for navigation purposes.
    pub highlighted: bool,
    /// Cosmetic: render this token in jump-table-reference coloring.
    pub jump_table_colored: bool,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, pc: Option<Addr>) -> Self {
        Self {
            kind,
            text: text.into(),
            pc,
            highlighted: false,
            jump_table_colored: false,
        }
    }

    fn newline() -> Self {
        Self::new(TokenKind::Newline, "\n", None)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.text == other.text && self.pc == other.pc
    }
}

impl Eq for Token {}

/// The canonical per-instruction token stream for one subroutine.
#[derive(Debug, Clone)]
pub struct Disassembly {
    /// The subroutine this projects.
    pub subroutine_pc: Addr,
    /// The rendered token stream, in display order.
    pub tokens: Vec<Token>,
}

/// The fixed text used to separate subroutines in a [`RomDisassembly`].
pub const ROM_SEPARATOR: &str = "; ----------------------------------------";

/// A classified, validated change extracted from a [`Disassembly::diff_edit`]
/// pass. The caller applies these to the [`Log`]; `diff_edit` itself never
/// mutates it.
#[derive(Debug, Clone, PartialEq)]
pub enum DisassemblyEdit {
    /// Set (or, if `text` is empty, clear) the comment at `pc`.
    Comment {
        /// Target pc.
        pc: Addr,
        /// New comment text.
        text: String,
    },
    /// Rename `old` to `new`. Applied later, in bulk, by
    /// [`Log::rename_labels_bulk`](crate::log::Log::rename_labels_bulk).
    Rename {
        /// Current name (may be dotted).
        old: String,
        /// Proposed name (must match `old`'s dottedness).
        new: String,
    },
    /// Set the instruction-level assertion at `pc`.
    AssertInstruction {
        /// Target pc.
        pc: Addr,
        /// Asserted change.
        change: StateChange,
    },
    /// Remove the instruction-level assertion at `pc`.
    DeassertInstruction {
        /// Target pc.
        pc: Addr,
    },
    /// Set the subroutine-level assertion for the return site `return_pc`.
    AssertSubroutine {
        /// The subroutine this return belongs to.
        subroutine_pc: Addr,
        /// The specific return instruction's pc.
        return_pc: Addr,
        /// Asserted change.
        change: StateChange,
    },
    /// Remove the subroutine-level assertion for a return site.
    DeassertSubroutine {
        /// The subroutine this return belongs to.
        subroutine_pc: Addr,
        /// The specific return instruction's pc.
        return_pc: Addr,
    },
}

fn operand_token<R: Rom>(
    log: &Log<R>,
    instr: &crate::instruction::Instruction,
    current_subroutine: Addr,
) -> Option<Token> {
    if instr.address_mode() == crate::opcodes::AddressMode::Implied {
        return None;
    }
    let pc = instr.pc();
    if let Some(target) = instr.absolute_argument() {
        if let Some(sub) = log.subroutine(target) {
            return Some(Token::new(TokenKind::OperandLabel, sub.label().to_string(), Some(pc)));
        }
        if let Some(name) = log.local_labels(current_subroutine).and_then(|l| l.name_of(target)) {
            return Some(Token::new(TokenKind::OperandLabel, format!(".{name}"), Some(pc)));
        }
    }
    Some(Token::new(TokenKind::Operand, instr.argument_string(), Some(pc)))
}

fn state_header_token(pc: Addr, change: StateChange) -> Token {
    if change.asserted {
        Token::new(TokenKind::AssertedState, change.to_string(), Some(pc))
    } else if change.is_unknown() {
        Token::new(
            TokenKind::UnknownState,
            format!("unknown ({})", change.unknown_reason().as_str()),
            Some(pc),
        )
    } else {
        Token::new(TokenKind::KnownState, change.to_string(), Some(pc))
    }
}

/// Renders the subroutine at `subroutine_pc` as a [`Disassembly`].
pub fn render<R: Rom>(log: &Log<R>, subroutine_pc: Addr) -> Result<Disassembly, GilgameshError> {
    let sub = log
        .subroutine(subroutine_pc)
        .ok_or(GilgameshError::InvalidAddress(subroutine_pc))?;

    let mut tokens = Vec::new();
    tokens.push(Token::new(TokenKind::Label, sub.label().to_string(), None));
    tokens.push(Token::newline());

    if let Some(entry) = log.entry_points().get(&subroutine_pc) {
        tokens.push(Token::new(
            TokenKind::LastKnownState,
            entry.initial_state.to_string(),
            None,
        ));
        tokens.push(Token::newline());
    }

    let local_labels = log.local_labels(subroutine_pc);
    for (&pc, instr) in sub.instructions() {
        if let Some(name) = local_labels.and_then(|l| l.name_of(pc)) {
            tokens.push(Token::new(TokenKind::Label, format!(".{name}"), Some(pc)));
            tokens.push(Token::newline());
        }

        if instr.stack_manipulation != crate::instruction::StackManipulation::None {
            let text = match instr.stack_manipulation {
                crate::instruction::StackManipulation::Harmless => "stack manipulation: harmless",
                crate::instruction::StackManipulation::CausesUnknownState => {
                    "stack manipulation: causes unknown state"
                }
                crate::instruction::StackManipulation::None => unreachable!("checked above"),
            };
            tokens.push(Token::new(TokenKind::StackManipulation, text, Some(pc)));
            tokens.push(Token::newline());
        }

        if instr.is_jump_table {
            tokens.push(Token::new(TokenKind::JumpTable, "jump table", Some(pc)));
            tokens.push(Token::newline());
            for (index, target) in log.jump_table_entries(pc) {
                let index_text = index.map_or_else(|| "*".to_string(), |i| i.to_string());
                let mut entry = Token::new(
                    TokenKind::JumpTableEntry,
                    format!("[{index_text}] -> ${target:06X}"),
                    Some(pc),
                );
                entry.jump_table_colored = true;
                tokens.push(entry);
                tokens.push(Token::newline());
            }
        }

        let is_assertable_site = instr.is_return() || instr.stopped_execution;
        if is_assertable_site {
            tokens.push(state_header_token(pc, instr.state_change_after()));
            tokens.push(Token::newline());

            let (assertion_type, change) = if instr.is_return() {
                match log.subroutine_assertion_at(subroutine_pc, pc) {
                    Some(c) => ("subroutine", Some(c)),
                    None => ("none", None),
                }
            } else {
                match log.instruction_assertion_at(pc) {
                    Some(c) => ("instruction", Some(c)),
                    None => ("none", None),
                }
            };
            tokens.push(Token::new(TokenKind::AssertionType, assertion_type, Some(pc)));
            let expr = change.map_or_else(|| "none".to_string(), |c| c.to_string());
            tokens.push(Token::new(TokenKind::Assertion, expr, Some(pc)));
            tokens.push(Token::newline());
        }

        tokens.push(Token::new(TokenKind::Operation, instr.name(), Some(pc)));
        if let Some(operand) = operand_token(log, instr, subroutine_pc) {
            tokens.push(operand);
        }
        tokens.push(Token::new(TokenKind::Pc, format!("${pc:06X}"), Some(pc)));
        if let Some(comment) = log.comment(pc) {
            tokens.push(Token::new(TokenKind::Comment, comment.to_string(), Some(pc)));
        }
        tokens.push(Token::newline());
    }

    Ok(Disassembly { subroutine_pc, tokens })
}

/// Renders `Render(tokens)` back to text, the exact inverse of `parse`.
#[must_use]
pub fn render_text(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut line: Vec<&Token> = Vec::new();
    for token in tokens {
        if token.kind == TokenKind::Newline {
            render_line(&mut out, &line);
            out.push('\n');
            line.clear();
        } else {
            line.push(token);
        }
    }
    if !line.is_empty() {
        render_line(&mut out, &line);
    }
    out
}

fn render_line(out: &mut String, line: &[&Token]) {
    for token in line {
        match token.kind {
            TokenKind::Label => {
                let _ = write!(out, "{}:", token.text);
            }
            TokenKind::SeparatorLine => {
                out.push_str(&token.text);
            }
            TokenKind::StackManipulation | TokenKind::JumpTable | TokenKind::JumpTableEntry => {
                let _ = write!(out, "; {}", token.text);
            }
            TokenKind::LastKnownState => {
                let _ = write!(out, "; entry {}", token.text);
            }
            TokenKind::KnownState | TokenKind::UnknownState => {
                let _ = write!(out, "; state {}", token.text);
            }
            TokenKind::AssertedState => {
                let _ = write!(out, "; state asserted:{}", token.text);
            }
            TokenKind::AssertionType => {
                let _ = write!(out, "; assert {}", token.text);
            }
            TokenKind::Assertion => {
                let _ = write!(out, " {}", token.text);
            }
            TokenKind::Operation => {
                let _ = write!(out, "    {}", token.text);
            }
            TokenKind::Operand | TokenKind::OperandLabel => {
                let _ = write!(out, " {}", token.text);
            }
            TokenKind::Pc => {
                let _ = write!(out, " ; {}", token.text);
            }
            TokenKind::Comment => {
                let _ = write!(out, " | {}", token.text);
            }
            TokenKind::Newline => {}
        }
    }
}

use std::fmt::Write as _;

/// Tokenizes `text` back into a [`Token`] stream, following the same line
/// grammar `render` emits. Every header line's tokens are attributed to the
/// pc found on the *next* instruction line in its block, matching how
/// `render` walked forward from headers to the instruction they annotate.
///
/// Returns `GilgameshError::ParserError` on any line that doesn't match the
/// grammar, with a 1-based line number.
pub fn parse(text: &str) -> Result<Vec<Token>, GilgameshError> {
    let mut tokens = Vec::new();
    let mut pending: Vec<Token> = Vec::new();
    let mut first_block = true;

    for (i, raw_line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if line == ROM_SEPARATOR {
            flush_pending(&mut tokens, &mut pending, None);
            tokens.push(Token::new(TokenKind::SeparatorLine, line, None));
            tokens.push(Token::newline());
            first_block = true;
            continue;
        }

        if let Some(label) = parse_label_line(line) {
            if first_block {
                flush_pending(&mut tokens, &mut pending, None);
                tokens.push(Token::new(TokenKind::Label, label, None));
                tokens.push(Token::newline());
                first_block = false;
            } else {
                pending.push(Token::new(TokenKind::Label, label, None));
                pending.push(Token::newline());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(';').map(str::trim) {
            if let Some(state) = rest.strip_prefix("entry ") {
                tokens.push(Token::new(TokenKind::LastKnownState, state.trim(), None));
                tokens.push(Token::newline());
                continue;
            }
            if let Some(state) = rest.strip_prefix("state ") {
                let state = state.trim();
                let kind = if state.starts_with("unknown") {
                    TokenKind::UnknownState
                } else if let Some(stripped) = state.strip_prefix("asserted:") {
                    pending.push(Token::new(TokenKind::AssertedState, stripped.trim(), None));
                    pending.push(Token::newline());
                    continue;
                } else {
                    TokenKind::KnownState
                };
                pending.push(Token::new(kind, state, None));
                pending.push(Token::newline());
                continue;
            }
            if let Some(assertion) = rest.strip_prefix("assert ") {
                let (kind, expr) = assertion.trim().split_once(' ').unwrap_or((assertion.trim(), "none"));
                pending.push(Token::new(TokenKind::AssertionType, kind, None));
                pending.push(Token::new(TokenKind::Assertion, expr, None));
                pending.push(Token::newline());
                continue;
            }
            if rest.starts_with("stack manipulation") {
                pending.push(Token::new(TokenKind::StackManipulation, rest, None));
                pending.push(Token::newline());
                continue;
            }
            if rest == "jump table" {
                pending.push(Token::new(TokenKind::JumpTable, rest, None));
                pending.push(Token::newline());
                continue;
            }
            if rest.starts_with('[') {
                pending.push(Token::new(TokenKind::JumpTableEntry, rest, None));
                pending.push(Token::newline());
                continue;
            }
            return Err(GilgameshError::ParserError {
                line: line_no,
                message: format!("unrecognized header line: {line}"),
            });
        }

        let (instruction_tokens, pc) = parse_instruction_line(line, line_no)?;
        flush_pending(&mut tokens, &mut pending, Some(pc));
        tokens.extend(instruction_tokens);
        tokens.push(Token::newline());
    }

    flush_pending(&mut tokens, &mut pending, None);
    Ok(tokens)
}

fn flush_pending(tokens: &mut Vec<Token>, pending: &mut Vec<Token>, pc: Option<Addr>) {
    for mut token in pending.drain(..) {
        if token.kind != TokenKind::Newline {
            token.pc = pc;
        }
        tokens.push(token);
    }
}

fn parse_label_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let name = trimmed.strip_suffix(':')?;
    if name.is_empty() {
        return None;
    }
    let bare = name.strip_prefix('.').unwrap_or(name);
    let mut chars = bare.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if first_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name.to_string())
    } else {
        None
    }
}

/// Parses `OPERATION [OPERAND] ; $PC [| comment]` into its tokens plus the
/// pc those tokens (and any pending header tokens) should be attributed to.
fn parse_instruction_line(line: &str, line_no: usize) -> Result<(Vec<Token>, Addr), GilgameshError> {
    let (code_part, comment) = match line.split_once('|') {
        Some((code, comment)) => (code, Some(comment.trim().to_string())),
        None => (line, None),
    };
    let (code_part, pc_part) = code_part.split_once(';').ok_or_else(|| GilgameshError::ParserError {
        line: line_no,
        message: "missing `;` before pc field".to_string(),
    })?;

    let pc_text = pc_part.trim();
    let pc_digits = pc_text.strip_prefix('$').ok_or_else(|| GilgameshError::ParserError {
        line: line_no,
        message: format!("malformed pc field: {pc_text}"),
    })?;
    let pc = Addr::from_str_radix(pc_digits, 16).map_err(|_| GilgameshError::ParserError {
        line: line_no,
        message: format!("malformed pc field: {pc_text}"),
    })?;

    let mut words = code_part.split_whitespace();
    let op = words.next().ok_or_else(|| GilgameshError::ParserError {
        line: line_no,
        message: "missing operation mnemonic".to_string(),
    })?;
    let operand = words.next();
    if words.next().is_some() {
        return Err(GilgameshError::ParserError {
            line: line_no,
            message: format!("unexpected extra words on instruction line: {line}"),
        });
    }

    let mut tokens = vec![Token::new(TokenKind::Operation, op.to_ascii_lowercase(), Some(pc))];
    if let Some(operand) = operand {
        // A label reference renders as a bare identifier (subroutine label)
        // or a dotted local label; every other operand form (`#$..`, `$..`,
        // `(..)`, `[..]`, the bare accumulator `a`, or a `MOVE` byte pair)
        // starts with something other than an identifier-leading letter.
        let first = operand.strip_prefix('.').unwrap_or(operand).chars().next();
        let kind = if operand != "a"
            && first.is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            TokenKind::OperandLabel
        } else {
            TokenKind::Operand
        };
        tokens.push(Token::new(kind, operand, Some(pc)));
    }
    tokens.push(Token::new(TokenKind::Pc, format!("${pc:06X}"), Some(pc)));
    if let Some(comment) = comment {
        tokens.push(Token::new(TokenKind::Comment, comment, Some(pc)));
    }
    Ok((tokens, pc))
}

impl Disassembly {
    /// Renders this disassembly's current tokens back to text.
    #[must_use]
    pub fn render_text(&self) -> String {
        render_text(&self.tokens)
    }

    /// Tokenizes `edited_text` and zip-pairs it against this disassembly's
    /// original tokens, classifying every difference per spec §4.6:
    ///
    /// - A `NEWLINE` mismatch, or a token whose `kind` changed, is an error
    ///   naming the 1-based line it occurred on.
    /// - A changed `COMMENT` becomes [`DisassemblyEdit::Comment`].
    /// - A changed `LABEL` / `OPERAND_LABEL` becomes [`DisassemblyEdit::Rename`].
    /// - A changed `ASSERTION_TYPE` / `ASSERTION` pair becomes the matching
    ///   assert/deassert edit.
    /// - Any other token whose text changed is an error (read-only).
    ///
    /// Edits are returned, not applied — the caller validates renames in
    /// bulk (`Log::rename_labels_bulk`) before committing anything.
    pub fn diff_edit(&self, edited_text: &str) -> Result<Vec<DisassemblyEdit>, GilgameshError> {
        let edited = parse(edited_text)?;
        if edited.len() != self.tokens.len() {
            return Err(GilgameshError::ParserError {
                line: line_count_mismatch(&self.tokens, &edited),
                message: "edited text has a different number of tokens than the original: \
                          a line was added or removed"
                    .to_string(),
            });
        }

        let mut edits = Vec::new();
        let mut line_no = 1usize;

        // Collected up front, independent of whether the ASSERTION_TYPE
        // token's text actually changed: the paired ASSERTION token needs
        // to know the *resulting* kind (instruction/subroutine/none) even
        // when only the expression was edited and the type field was left
        // untouched (e.g. an already-`subroutine`-asserted return site
        // whose expression changes but whose type word doesn't).
        let mut rename_type_by_assertion: HashMap<Addr, &'static str> = HashMap::new();
        for (original, new) in self.tokens.iter().zip(edited.iter()) {
            if original.kind == TokenKind::AssertionType {
                if let Some(pc) = original.pc {
                    rename_type_by_assertion.insert(pc, assertion_kind(&new.text));
                }
            }
        }

        for (original, new) in self.tokens.iter().zip(edited.iter()) {
            if original.kind == TokenKind::Newline {
                if new.kind != TokenKind::Newline {
                    return Err(GilgameshError::ParserError {
                        line: line_no,
                        message: "line structure changed: expected a line break here".to_string(),
                    });
                }
                line_no += 1;
                continue;
            }
            if new.kind == TokenKind::Newline || new.kind != original.kind {
                return Err(GilgameshError::ParserError {
                    line: line_no,
                    message: format!(
                        "line structure changed: expected a {:?} token, found {:?}",
                        original.kind, new.kind
                    ),
                });
            }
            if original.text == new.text {
                continue;
            }

            match original.kind {
                TokenKind::Comment => {
                    let pc = original.pc.ok_or_else(|| GilgameshError::ParserError {
                        line: line_no,
                        message: "comment token missing pc context".to_string(),
                    })?;
                    edits.push(DisassemblyEdit::Comment {
                        pc,
                        text: new.text.clone(),
                    });
                }
                TokenKind::Label | TokenKind::OperandLabel => {
                    edits.push(DisassemblyEdit::Rename {
                        old: original.text.clone(),
                        new: new.text.clone(),
                    });
                }
                TokenKind::AssertionType => {
                    // Kind already captured in the prepass above.
                }
                TokenKind::Assertion => {
                    let pc = original.pc.ok_or_else(|| GilgameshError::ParserError {
                        line: line_no,
                        message: "assertion token missing pc context".to_string(),
                    })?;
                    let kind = rename_type_by_assertion.get(&pc).copied().unwrap_or("instruction");
                    edits.push(build_assertion_edit(self.subroutine_pc, pc, kind, &new.text, line_no)?);
                }
                _ => {
                    return Err(GilgameshError::ParserError {
                        line: line_no,
                        message: format!("{:?} is a read-only field and cannot be edited", original.kind),
                    });
                }
            }
        }

        Ok(edits)
    }
}

fn assertion_kind(text: &str) -> &'static str {
    match text {
        "subroutine" => "subroutine",
        "none" => "none_explicit",
        _ => "instruction",
    }
}

fn build_assertion_edit(
    subroutine_pc: Addr,
    pc: Addr,
    kind: &str,
    expr: &str,
    line_no: usize,
) -> Result<DisassemblyEdit, GilgameshError> {
    if expr == "none" || kind == "none_explicit" {
        return Ok(match kind {
            "subroutine" => DisassemblyEdit::DeassertSubroutine {
                subroutine_pc,
                return_pc: pc,
            },
            _ => DisassemblyEdit::DeassertInstruction { pc },
        });
    }
    let change = StateChange::from_expr(expr).map_err(|_| GilgameshError::ParserError {
        line: line_no,
        message: format!("invalid assertion expression: {expr}"),
    })?;
    Ok(match kind {
        "subroutine" => DisassemblyEdit::AssertSubroutine {
            subroutine_pc,
            return_pc: pc,
            change,
        },
        _ => DisassemblyEdit::AssertInstruction { pc, change },
    })
}

fn line_count_mismatch(original: &[Token], edited: &[Token]) -> usize {
    original
        .iter()
        .zip(edited.iter())
        .take_while(|(a, b)| a.kind == b.kind)
        .filter(|(a, _)| a.kind == TokenKind::Newline)
        .count()
        + 1
}

/// Renders every subroutine in `log`, in pc order, separated by
/// [`ROM_SEPARATOR`] lines — the whole-ROM counterpart to [`render`].
#[derive(Debug, Clone)]
pub struct RomDisassembly {
    /// One [`Disassembly`] per subroutine, in pc order.
    pub subroutines: Vec<Disassembly>,
}

/// Renders every subroutine currently in `log`.
pub fn render_rom<R: Rom>(log: &Log<R>) -> Result<RomDisassembly, GilgameshError> {
    let mut subroutines = Vec::new();
    for &pc in log.subroutines().keys() {
        subroutines.push(render(log, pc)?);
    }
    Ok(RomDisassembly { subroutines })
}

impl RomDisassembly {
    /// Renders the whole ROM disassembly to text, subroutines separated by
    /// [`ROM_SEPARATOR`].
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (i, sub) in self.subroutines.iter().enumerate() {
            if i > 0 {
                out.push_str(ROM_SEPARATOR);
                out.push('\n');
            }
            out.push_str(&sub.render_text());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::test_support::TestRom;
    use crate::state::State;

    fn analyzed(program: &[u8]) -> Log<TestRom> {
        let mut log = Log::new(TestRom::with_program(program));
        log.analyze().unwrap();
        log
    }

    #[test]
    fn render_then_parse_round_trips_a_simple_subroutine() {
        // LDA #$42 ; RTS
        let log = analyzed(&[0xA9, 0x42, 0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text();
        let reparsed = parse(&text).unwrap();
        assert_eq!(disasm.tokens, reparsed);
    }

    #[test]
    fn round_trip_with_local_label_and_branch() {
        // $8000 BEQ +3 ; $8002 REP #$30 ; $8004 RTS ; $8005 SEP #$30 ; $8007 RTS
        let log = analyzed(&[0xF0, 0x03, 0xC2, 0x30, 0x60, 0xE2, 0x30, 0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text();
        let reparsed = parse(&text).unwrap();
        assert_eq!(disasm.tokens, reparsed);
    }

    #[test]
    fn editing_a_comment_produces_a_comment_edit() {
        let log = analyzed(&[0xA9, 0x42, 0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        let mut text = disasm.render_text();
        text = text.replacen("$008000", "$008000 | loads the magic byte", 1);
        let edits = disasm.diff_edit(&text).unwrap();
        assert_eq!(
            edits,
            vec![DisassemblyEdit::Comment {
                pc: 0x8000,
                text: "loads the magic byte".to_string(),
            }]
        );
    }

    #[test]
    fn editing_the_subroutine_label_produces_a_rename_edit() {
        let log = analyzed(&[0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text().replacen("sub_008000", "main", 1);
        let edits = disasm.diff_edit(&text).unwrap();
        assert_eq!(
            edits,
            vec![DisassemblyEdit::Rename {
                old: "sub_008000".to_string(),
                new: "main".to_string(),
            }]
        );
    }

    #[test]
    fn editing_a_read_only_pc_field_is_an_error() {
        let log = analyzed(&[0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text().replacen("$008000", "$008001", 1);
        assert!(matches!(
            disasm.diff_edit(&text),
            Err(GilgameshError::ParserError { .. })
        ));
    }

    #[test]
    fn removing_a_line_is_a_parser_error() {
        let log = analyzed(&[0xA9, 0x42, 0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text();
        let truncated: String = text.lines().take(text.lines().count() - 1).collect::<Vec<_>>().join("\n");
        assert!(matches!(
            disasm.diff_edit(&truncated),
            Err(GilgameshError::ParserError { .. })
        ));
    }

    #[test]
    fn asserting_an_instruction_state_change_through_edit() {
        // JMP ($1234) -- unresolved indirect jump, one assertable site.
        let log = analyzed(&[0x6C, 0x34, 0x12]);
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text().replacen("; assert none none", "; assert instruction m=0,x=0", 1);
        let edits = disasm.diff_edit(&text).unwrap();
        assert_eq!(
            edits,
            vec![DisassemblyEdit::AssertInstruction {
                pc: 0x8000,
                change: StateChange::known(Some(false), Some(false)),
            }]
        );
    }

    #[test]
    fn editing_an_asserted_subroutine_expression_keeps_the_subroutine_kind() {
        // LDA #$42 ; RTS, with the return site pre-asserted as a subroutine
        // change. Editing only the expression (leaving the "subroutine"
        // AssertionType word untouched) must still classify the edit as a
        // subroutine assertion, not fall back to the instruction default.
        let mut log = analyzed(&[0xA9, 0x42, 0x60]);
        log.assert_subroutine_state_change(0x8000, 0x8002, StateChange::known(Some(true), Some(true)))
            .unwrap();
        log.analyze().unwrap();
        let disasm = render(&log, 0x8000).unwrap();
        let text = disasm.render_text();
        assert!(text.contains("; assert subroutine m=1,x=1"));
        let edited = text.replacen("; assert subroutine m=1,x=1", "; assert subroutine m=0,x=0", 1);
        let edits = disasm.diff_edit(&edited).unwrap();
        assert_eq!(
            edits,
            vec![DisassemblyEdit::AssertSubroutine {
                subroutine_pc: 0x8000,
                return_pc: 0x8002,
                change: StateChange::known(Some(false), Some(false)),
            }]
        );
    }

    #[test]
    fn entry_point_subroutine_renders_last_known_state() {
        let log = analyzed(&[0x60]);
        let disasm = render(&log, 0x8000).unwrap();
        assert!(disasm.tokens.iter().any(|t| t.kind == TokenKind::LastKnownState));
        let text = disasm.render_text();
        assert!(text.contains(&State::POWER_ON.to_string()));
    }

    #[test]
    fn rom_disassembly_separates_subroutines() {
        let mut program = vec![0x20, 0x03, 0x80, 0x60];
        program.push(0x60);
        let log = analyzed(&program);
        let rom = render_rom(&log).unwrap();
        assert!(rom.subroutines.len() >= 2);
        let text = rom.render_text();
        assert!(text.contains(ROM_SEPARATOR));
    }
}
