use crate::command::parser::parse_statement;
use crate::command::types::AstNode;
use crate::engine::errors::PlanError;

#[test]
fn test_nested_calls() {
    let ast = parse_statement("store(filter(scan(A), v > 5), B)").unwrap();
    let AstNode::Call { name, args } = &ast else {
        panic!("expected call");
    };
    assert_eq!(name, "store");
    assert_eq!(args.len(), 2);
    assert!(matches!(&args[0], AstNode::Call { name, .. } if name == "filter"));
    assert!(matches!(&args[1], AstNode::Identifier(n) if n == "B"));
}

#[test]
fn test_expression_precedence() {
    let ast = parse_statement("filter(scan(A), v + 1 * 2 > 5)").unwrap();
    let AstNode::Call { args, .. } = &ast else {
        panic!("expected call");
    };
    // (v + (1 * 2)) > 5
    let AstNode::BinaryOp { op, left, .. } = &args[1] else {
        panic!("expected comparison");
    };
    assert_eq!(op, ">");
    let AstNode::BinaryOp { op, right, .. } = left.as_ref() else {
        panic!("expected addition");
    };
    assert_eq!(op, "+");
    assert!(matches!(right.as_ref(), AstNode::BinaryOp { op, .. } if op == "*"));
}

#[test]
fn test_schema_literal() {
    let ast = parse_statement("build(<v:int32, w:double null>[i=0:99,10,2, j=-5:5,11,0], 1)")
        .unwrap();
    let AstNode::Call { args, .. } = &ast else {
        panic!("expected call");
    };
    let AstNode::Schema(schema) = &args[0] else {
        panic!("expected schema literal");
    };
    assert_eq!(schema.attributes().len(), 2);
    assert!(!schema.attributes()[0].is_nullable());
    assert!(schema.attributes()[1].is_nullable());
    assert_eq!(schema.dimensions().len(), 2);
    assert_eq!(schema.dimensions()[0].chunk_overlap(), 2);
    assert_eq!(schema.dimensions()[1].start(), -5);
}

#[test]
fn test_string_and_star_arguments() {
    let ast = parse_statement("input(<v:int32>[i=0:3,4,0], 'rows.jsonl')").unwrap();
    let AstNode::Call { args, .. } = &ast else {
        panic!("expected call");
    };
    assert!(matches!(&args[1], AstNode::Text(s) if s == "rows.jsonl"));

    let ast = parse_statement("aggregate(scan(A), count(*))").unwrap();
    let AstNode::Call { args, .. } = &ast else {
        panic!("expected call");
    };
    let AstNode::Call { name, args } = &args[1] else {
        panic!("expected aggregate call");
    };
    assert_eq!(name, "count");
    assert!(matches!(args[0], AstNode::Star));
}

#[test]
fn test_comparison_operators() {
    for (text, op) in [
        ("v <= 3", "<="),
        ("v >= 3", ">="),
        ("v <> 3", "<>"),
        ("v = 3", "="),
    ] {
        let ast = parse_statement(&format!("filter(scan(A), {text})")).unwrap();
        let AstNode::Call { args, .. } = &ast else {
            panic!("expected call");
        };
        assert!(matches!(&args[1], AstNode::BinaryOp { op: got, .. } if got == op));
    }
}

#[test]
fn test_negative_numbers() {
    let ast = parse_statement("sg(scan(A), 0, -1)").unwrap();
    let AstNode::Call { args, .. } = &ast else {
        panic!("expected call");
    };
    assert!(matches!(args[2], AstNode::Integer(-1)));
}

#[test]
fn test_syntax_errors() {
    assert!(matches!(
        parse_statement("scan(A"),
        Err(PlanError::Syntax(_))
    ));
    assert!(matches!(
        parse_statement("scan(A)) extra"),
        Err(PlanError::Syntax(_))
    ));
    assert!(matches!(
        parse_statement("filter(scan(A), 'unterminated)"),
        Err(PlanError::Syntax(_))
    ));
}
