//! Built-in demonstration grammars.
//!
//! Two small automata exercise the whole analysis surface: `arithmetic` is
//! clean (disjoint decisions, no ambiguity), `dangling_else` carries the
//! classic if/then/else ambiguity. Both come with a matching
//! [`ReferenceExecutor`] lexicon so the profiler can run them end to end;
//! the CLI exposes them under `--grammar arith` and `--grammar dangling-else`.

use crate::{Grammar, GrammarBuilder, LexSpec, ReferenceExecutor, TokenId};

/// `expr: term (('+'|'-') term)* ; term: factor (('*'|'/') factor)* ;
/// factor: NUMBER | '(' expr ')'` with `expr` as the entry point.
pub fn arithmetic() -> Grammar {
    let mut b = GrammarBuilder::new();
    let number = b.token("NUMBER");
    let plus = b.token("PLUS");
    let minus = b.token("MINUS");
    let star = b.token("STAR");
    let slash = b.token("SLASH");
    let lparen = b.token("LPAREN");
    let rparen = b.token("RPAREN");

    let expr = b.parser_rule("expr");
    let term = b.parser_rule("term");
    let factor = b.parser_rule("factor");
    b.entry_point(expr);

    // expr: term (('+'|'-') term)*
    let d_expr = b.decision(expr);
    let after_op = b.state(expr);
    b.rule_call(b.start_state(expr), term, d_expr);
    b.terminal(d_expr, &[plus, minus], after_op);
    b.epsilon(d_expr, b.stop_state(expr));
    b.rule_call(after_op, term, d_expr);

    // term: factor (('*'|'/') factor)*
    let d_term = b.decision(term);
    let after_mul = b.state(term);
    b.rule_call(b.start_state(term), factor, d_term);
    b.terminal(d_term, &[star, slash], after_mul);
    b.epsilon(d_term, b.stop_state(term));
    b.rule_call(after_mul, factor, d_term);

    // factor: NUMBER | '(' expr ')'
    let d_factor = b.decision(factor);
    let after_lparen = b.state(factor);
    let before_rparen = b.state(factor);
    b.epsilon(b.start_state(factor), d_factor);
    b.terminal(d_factor, &[number], b.stop_state(factor));
    b.terminal(d_factor, &[lparen], after_lparen);
    b.rule_call(after_lparen, expr, before_rparen);
    b.terminal(before_rparen, &[rparen], b.stop_state(factor));

    b.build().expect("arithmetic fixture is well formed")
}

/// Lexicon matching [`arithmetic`].
pub fn arithmetic_executor() -> ReferenceExecutor {
    let g = arithmetic();
    let lexicon = vec![
        (token_named(&g, "PLUS"), LexSpec::Literal("+".to_string())),
        (token_named(&g, "MINUS"), LexSpec::Literal("-".to_string())),
        (token_named(&g, "STAR"), LexSpec::Literal("*".to_string())),
        (token_named(&g, "SLASH"), LexSpec::Literal("/".to_string())),
        (token_named(&g, "LPAREN"), LexSpec::Literal("(".to_string())),
        (token_named(&g, "RPAREN"), LexSpec::Literal(")".to_string())),
        (token_named(&g, "NUMBER"), LexSpec::Pattern("[0-9]+".to_string())),
    ];
    ReferenceExecutor::new(lexicon).expect("arithmetic lexicon is well formed")
}

/// `stat: 'if' expr 'then' stat 'else' stat | 'if' expr 'then' stat | ID ;
/// expr: ID` with `stat` as the entry point. The first two alternatives share
/// their entire `if expr then stat` prefix, so else-attachment is a genuine
/// runtime ambiguity.
pub fn dangling_else() -> Grammar {
    let mut b = GrammarBuilder::new();
    let if_tok = b.token("IF");
    let then_tok = b.token("THEN");
    let else_tok = b.token("ELSE");
    let id = b.token("ID");

    let stat = b.parser_rule("stat");
    let expr = b.parser_rule("expr");
    b.entry_point(stat);

    let d_stat = b.decision(stat);
    b.epsilon(b.start_state(stat), d_stat);

    // alt 0: 'if' expr 'then' stat 'else' stat
    let a0_cond = b.state(stat);
    let a0_then = b.state(stat);
    let a0_body = b.state(stat);
    let a0_else = b.state(stat);
    let a0_tail = b.state(stat);
    b.terminal(d_stat, &[if_tok], a0_cond);
    b.rule_call(a0_cond, expr, a0_then);
    b.terminal(a0_then, &[then_tok], a0_body);
    b.rule_call(a0_body, stat, a0_else);
    b.terminal(a0_else, &[else_tok], a0_tail);
    b.rule_call(a0_tail, stat, b.stop_state(stat));

    // alt 1: 'if' expr 'then' stat
    let a1_cond = b.state(stat);
    let a1_then = b.state(stat);
    let a1_body = b.state(stat);
    b.terminal(d_stat, &[if_tok], a1_cond);
    b.rule_call(a1_cond, expr, a1_then);
    b.terminal(a1_then, &[then_tok], a1_body);
    b.rule_call(a1_body, stat, b.stop_state(stat));

    // alt 2: ID
    b.terminal(d_stat, &[id], b.stop_state(stat));

    // expr: ID
    b.terminal(b.start_state(expr), &[id], b.stop_state(expr));

    b.build().expect("dangling-else fixture is well formed")
}

/// Lexicon matching [`dangling_else`]. Keyword literals precede the `ID`
/// pattern so longest-match ties resolve to the keyword.
pub fn dangling_else_executor() -> ReferenceExecutor {
    let g = dangling_else();
    let lexicon = vec![
        (token_named(&g, "IF"), LexSpec::Literal("if".to_string())),
        (token_named(&g, "THEN"), LexSpec::Literal("then".to_string())),
        (token_named(&g, "ELSE"), LexSpec::Literal("else".to_string())),
        (token_named(&g, "ID"), LexSpec::Pattern("[A-Za-z_][A-Za-z0-9_]*".to_string())),
    ];
    ReferenceExecutor::new(lexicon).expect("dangling-else lexicon is well formed")
}

/// Token id for `name` in the [`arithmetic`] grammar.
pub fn arithmetic_token(grammar: &Grammar, name: &str) -> TokenId {
    token_named(grammar, name)
}

fn token_named(grammar: &Grammar, name: &str) -> TokenId {
    (0..grammar.token_count() as TokenId)
        .find(|&t| grammar.token_name(t) == name)
        .unwrap_or_else(|| panic!("no token named {name:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_build() {
        let a = arithmetic();
        assert_eq!(a.rules().len(), 3);
        assert_eq!(a.decision_count(), 3);

        let d = dangling_else();
        assert_eq!(d.rules().len(), 2);
        assert!(d.is_entry_point(d.require_rule("stat").unwrap()));
    }
}
