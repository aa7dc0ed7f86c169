// Parser for .stg stage definition files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a stage source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

/// Left fold step for binary operator chains; the span covers both operands.
fn fold_binary(lhs: Expr, (op, rhs): (BinaryOp, Expr)) -> Expr {
    let span: SimpleSpan = (lhs.span.start()..rhs.span.end()).into();
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Expressions ──
    //
    // sum     := product (('+' | '-') product)*
    // product := unary (('*' | '/') unary)*
    // unary   := '-' atom | atom
    // atom    := INT | call | IDENT | '(' sum ')'

    let expr = recursive(|expr| {
        let call_args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let slot = select! { Token::Int(n) => n }
            .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let call = ident
            .clone()
            .then(call_args)
            .then(slot.or_not())
            .map_with(|((name, args), slot), e| Expr {
                kind: ExprKind::Call(CallExpr { name, args, slot }),
                span: e.span(),
            });

        let int = select! { Token::Int(n) => n }.map_with(|n, e| Expr {
            kind: ExprKind::Int(n),
            span: e.span(),
        });

        let var = ident.clone().map(|id| Expr {
            kind: ExprKind::Var(id.name),
            span: id.span,
        });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((int, call, var, parens));

        let unary = just(Token::Minus)
            .ignore_then(atom.clone())
            .map_with(|operand, e| Expr {
                kind: ExprKind::Neg(Box::new(operand)),
                span: e.span(),
            })
            .or(atom);

        let product_op = choice((
            just(Token::Star).to(BinaryOp::Mul),
            just(Token::Slash).to(BinaryOp::Div),
        ));
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), fold_binary);

        let sum_op = choice((
            just(Token::Plus).to(BinaryOp::Add),
            just(Token::Minus).to(BinaryOp::Sub),
        ));
        product
            .clone()
            .foldl(sum_op.then(product).repeated(), fold_binary)
    });

    // ── Shared lists ──

    let params = ident
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let name_list = ident
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>();

    // ── Statements ──

    let input_stmt = just(Token::Input)
        .ignore_then(ident.clone())
        .then(params.clone())
        .map(|(name, params)| StatementKind::Input(InputStmt { name, params }));

    let extern_stmt = just(Token::Extern)
        .ignore_then(ident.clone())
        .then(params.clone())
        .then_ignore(just(Token::Equals))
        .then(ident.clone())
        .then(params)
        .map(|(((name, params), symbol), inputs)| {
            StatementKind::Extern(ExternStmt {
                name,
                params,
                symbol,
                inputs,
            })
        });

    let output_stmt = just(Token::Output)
        .ignore_then(name_list.clone())
        .map(StatementKind::Output);

    let order_stmt = just(Token::Order)
        .ignore_then(name_list)
        .map(StatementKind::Order);

    let tuple_rhs = expr
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map(|values| (values, true));

    let scalar_rhs = expr.clone().map(|value| (vec![value], false));

    let define_stmt = ident
        .then(
            expr.separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then_ignore(just(Token::Equals))
        .then(tuple_rhs.or(scalar_rhs))
        .map(|((name, args), (values, tuple))| {
            StatementKind::Define(DefineStmt {
                name,
                args,
                values,
                tuple,
            })
        });

    // ── Statement dispatch ──

    let statement = choice((
        input_stmt,
        extern_stmt,
        output_stmt,
        order_stmt,
        define_stmt,
    ))
    .map_with(|kind, e| Statement {
        kind,
        span: e.span(),
    });

    // ── Program ──

    nl.clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |statements, e| Program {
            statements,
            span: e.span(),
        })
}

// ── Tests ──
