use pyracket::{parse_module, Builder, Source};

fn compile(src: &str) -> String {
    let source = Source::from_text("<test>", src);
    let stmts = parse_module(&source).expect("parse");
    Builder::new().compile(&stmts, true).expect("compile")
}

fn compile_exportable(src: &str) -> String {
    let source = Source::from_text("<test>", src);
    let stmts = parse_module(&source).expect("parse");
    Builder::new().compile(&stmts, false).expect("compile")
}

#[test]
fn function_definition_with_body_expression() {
    let out = compile("def f(x: int) -> int: return x + 1\n");
    assert!(out.contains("(define (f x) (+ x 1))"), "{}", out);
}

#[test]
fn output_starts_with_language_header() {
    let out = compile("x = 1\n");
    assert!(out.starts_with("#lang racket"), "{}", out);
}

#[test]
fn wrapped_output_has_entry_point() {
    let out = compile("x = 1\n");
    assert!(out.contains("(define (main)"), "{}", out);
    assert!(out.trim_end().ends_with("(main)"), "{}", out);
}

#[test]
fn exportable_output_has_no_entry_point() {
    let out = compile_exportable("x = 1\n");
    assert!(!out.contains("(define (main)"), "{}", out);
    assert!(out.contains("(define x 1)"), "{}", out);
}

#[test]
fn associative_chains_flatten_to_one_application() {
    let out = compile("x = 1 + 2 + 3 + 4 + 5\n");
    assert!(out.contains("(+ 1 2 3 4 5)"), "{}", out);
    // one application for the whole chain, not nested pairs
    assert_eq!(out.matches("(+ ").count(), 1, "{}", out);
}

#[test]
fn mixed_operator_chains_keep_grouping() {
    let out = compile("x = 1 + 2 * 3 + 4\n");
    assert!(out.contains("(+ 1 (* 2 3) 4)"), "{}", out);
}

#[test]
fn explicit_grouping_is_not_flattened() {
    let out = compile("x = 10 - (1 - 2)\n");
    assert!(out.contains("(- 10 (- 1 2))"), "{}", out);
}

#[test]
fn string_concatenation_flattens() {
    let out = compile("s = \"a\" + \"b\" + \"c\"\n");
    assert!(out.contains("(string-append \"a\" \"b\" \"c\")"), "{}", out);
}

#[test]
fn numeric_widening_in_chains() {
    let out = compile("def f(x: float) -> float: return x + 1\nf(2.5)\n");
    assert!(out.contains("(f 2.5)"), "{}", out);
}

#[test]
fn rebinding_emits_mutation() {
    let out = compile("x = 1\nx = 2\n");
    assert!(out.contains("(define x 1)"), "{}", out);
    assert!(out.contains("(set! x 2)"), "{}", out);
}

#[test]
fn tuple_swap_reads_pre_assignment_values() {
    let out = compile("a = 1\nb = 2\na, b = b, a\n");
    assert!(out.contains("(define ___a___ (deepcopy a))"), "{}", out);
    assert!(out.contains("(define ___b___ (deepcopy b))"), "{}", out);
    assert!(out.contains("(set! a ___b___)"), "{}", out);
    assert!(out.contains("(set! b ___a___)"), "{}", out);
    assert!(out.contains("(define (deepcopy var)"), "{}", out);
}

#[test]
fn multi_assignment_defines_fresh_names_in_sequence() {
    let out = compile("a, b = 1, 2\n");
    assert!(out.contains("(define a 1)"), "{}", out);
    assert!(out.contains("(define b 2)"), "{}", out);
}

#[test]
fn negative_literal_list_index_computes_from_length() {
    let out = compile("xs = [1, 2]\ny = xs[-1]\n");
    assert!(out.contains("(gvector-access xs (- (gvector-count xs) 1))"), "{}", out);
}

#[test]
fn dynamic_list_index_normalizes_at_runtime() {
    let out = compile("xs = [1, 2]\ni = 0\ny = xs[i]\n");
    assert!(
        out.contains("(gvector-access xs (if (< i 0) (- (gvector-count xs) (- i)) i))"),
        "{}",
        out
    );
}

#[test]
fn subscript_store_is_bounds_checked() {
    let out = compile("xs = [1, 2]\nxs[-1] = 5\n");
    assert!(out.contains("(safe-gvector-set! xs (- (gvector-count xs) 1) 5)"), "{}", out);
    assert!(out.contains("(define (safe-gvector-set! vec i elm)"), "{}", out);
}

#[test]
fn empty_list_resolves_through_append() {
    // the pending element type commits on the first concrete use, so the
    // later integer-typed read type-checks
    let out = compile("xs = []\nxs.append(1)\ny: int = xs[0]\n");
    assert!(out.contains("(define xs (gvector))"), "{}", out);
    assert!(out.contains("(gvector-add! xs 1)"), "{}", out);
}

#[test]
fn list_methods_lower_to_gvector_calls() {
    let out = compile("xs = [1]\nxs.insert(0, 2)\ny = xs.pop(-1)\n");
    assert!(out.contains("(gvector-insert! xs 0 2)"), "{}", out);
    assert!(out.contains("(gvector-pop! xs (- (gvector-count xs) 1))"), "{}", out);
}

#[test]
fn tuple_literal_and_static_indexing() {
    let out = compile("t = (1, \"a\")\nu = t[0]\nv = t[-1]\n");
    assert!(out.contains("(vector-immutable 1 \"a\")"), "{}", out);
    assert!(out.contains("(vector-ref t 0)"), "{}", out);
    assert!(out.contains("(vector-ref t (- (vector-length t) 1))"), "{}", out);
}

#[test]
fn conditional_with_both_branches_returning() {
    let out = compile("def f(x: int) -> int:\n    if x > 1:\n        return 1\n    else:\n        return 2\n");
    assert!(out.contains("(define (f x) (cond ((> x 1) 1) (else 2)))"), "{}", out);
}

#[test]
fn truthiness_of_numbers_strings_and_lists() {
    let out = compile("x = 5\nif x:\n    y = 1\n");
    assert!(out.contains("(!= x 0)"), "{}", out);

    let out = compile("s = \"hi\"\nif s:\n    y = 1\n");
    assert!(out.contains("(!= s \"\")"), "{}", out);

    let out = compile("xs = [1]\nif xs:\n    y = 1\n");
    assert!(out.contains("(!= (gvector-count xs) 0)"), "{}", out);
}

#[test]
fn truthiness_distributes_into_boolean_operands() {
    let out = compile("x = 5\ns = \"a\"\nif x or s:\n    y = 1\n");
    assert!(out.contains("(or (!= x 0) (!= s \"\"))"), "{}", out);
}

#[test]
fn not_applies_truthiness_in_test_context() {
    let out = compile("s = \"a\"\nif not s:\n    y = 1\n");
    assert!(out.contains("(not (!= s \"\"))"), "{}", out);
}

#[test]
fn branch_definitions_hoist_above_the_conditional() {
    let out = compile("x = 5\nif x > 1:\n    y = 2\nprint(y)\n");
    let define_at = out.find("(define y void)").expect("hoisted define");
    let cond_at = out.find("(cond ").expect("cond");
    assert!(define_at < cond_at, "{}", out);
    assert!(out.contains("(set! y 2)"), "{}", out);
}

#[test]
fn elif_chain_splices_into_one_cond() {
    let out = compile(
        "x = 5\nif x > 3:\n    y = 1\nelif x > 2:\n    y = 2\nelse:\n    y = 3\n",
    );
    assert_eq!(out.matches("(cond ").count(), 1, "{}", out);
    assert!(out.contains("(else (set! y 3))"), "{}", out);
}

#[test]
fn for_loop_over_list_adapts_and_hoists_target() {
    let out = compile(
        "from typing import List\ndef total(xs: List[int]) -> int:\n    acc = 0\n    for x in xs:\n        acc += x\n    return acc\n",
    );
    assert!(out.contains("(define x void)"), "{}", out);
    assert!(out.contains("(for-each (lambda (__i__) (set! x __i__) (set! acc (+ acc x))) (gvector->list xs))"), "{}", out);
}

#[test]
fn for_loop_over_range_skips_the_adapter() {
    let out = compile("for i in range(3):\n    print(i)\n");
    assert!(out.contains("(for-each (lambda (__i__) (set! i __i__) (PRINT i)) (range 3))"), "{}", out);
    assert!(!out.contains("gvector->list"), "{}", out);
}

#[test]
fn multi_target_for_destructures_each_element() {
    let out = compile(
        "from typing import List, Tuple\npairs: List[Tuple[int, str]] = []\nfor k, v in pairs:\n    print(k)\n",
    );
    assert!(out.contains("(set!-values (k v) (apply values (toList __i__)))"), "{}", out);
    assert!(out.contains("(define (toList x)"), "{}", out);
}

#[test]
fn augmented_assignment_desugars_to_binop() {
    let out = compile("x = 1\nx += 2\n");
    assert!(out.contains("(set! x (+ x 2))"), "{}", out);
}

#[test]
fn keyword_parameters_and_arguments() {
    let out = compile(
        "def scale(x: int, factor: int = 2) -> int:\n    return x * factor\ny = scale(3, factor=5)\n",
    );
    assert!(out.contains("(define (scale x #:factor [factor 2]) (* x factor))"), "{}", out);
    assert!(out.contains("(scale 3 #:factor 5)"), "{}", out);
}

#[test]
fn variadic_tail_becomes_rest_parameter() {
    let out = compile("def f(x: int, *rest) -> int:\n    return x\n");
    assert!(out.contains("(define (f x . rest)"), "{}", out);
}

#[test]
fn direct_recursion_resolves() {
    let out = compile(
        "def fact(n: int) -> int:\n    if n <= 1:\n        return 1\n    else:\n        return fact(n - 1)\n",
    );
    assert!(out.contains("(fact (- n 1))"), "{}", out);
}

#[test]
fn print_lowers_through_the_runtime_helper() {
    let out = compile("print(\"a\", 1, 2.5)\n");
    assert!(out.contains("(PRINT \"a\" 1 2.5)"), "{}", out);
    assert!(out.contains("(define (PRINT . args)"), "{}", out);
}

#[test]
fn input_supplies_an_empty_prompt() {
    let out = compile("name = input()\n");
    assert!(out.contains("(input \"\")"), "{}", out);
    assert!(out.contains("(define (input prompt)"), "{}", out);
}

#[test]
fn len_dispatches_on_receiver_type() {
    let out = compile("xs = [1]\nt = (1, 2)\nn = len(xs)\nm = len(t)\nk = len(\"ab\")\n");
    assert!(out.contains("(gvector-count xs)"), "{}", out);
    assert!(out.contains("(vector-length t)"), "{}", out);
    assert!(out.contains("(string-length \"ab\")"), "{}", out);
}

#[test]
fn type_converters_set_their_runtime_flags() {
    let out = compile("y = int(\"5\")\nz = bool(1)\n");
    assert!(out.contains("(int \"5\")"), "{}", out);
    assert!(out.contains("(bool 1)"), "{}", out);
    assert!(out.contains("(define (int x)"), "{}", out);
    // bool's truthiness helper pulls in the inequality helper transitively
    assert!(out.contains("(define (!= a b)"), "{}", out);
}

#[test]
fn comparison_chain_flattens_into_and() {
    let out = compile("b = 1 < 2 > 1\n");
    assert!(out.contains("(and (< 1 2)(> 2 1))"), "{}", out);
}

#[test]
fn string_comparison_uses_string_predicates() {
    let out = compile("b = \"a\" < \"b\"\n");
    assert!(out.contains("(string<? \"a\" \"b\")"), "{}", out);
}

#[test]
fn membership_test_requires_the_in_helper() {
    let out = compile("xs = [1]\nb = 1 in xs\n");
    assert!(out.contains("(in? 1 xs)"), "{}", out);
    assert!(out.contains("(define (in? elem coll)"), "{}", out);
    assert!(out.contains("(require data/gvector)"), "{}", out);
}

#[test]
fn conditional_expression_merges_branch_types() {
    let out = compile("x = 5\ny = 1 if x else 2\n");
    assert!(out.contains("(if (!= x 0) 1 2)"), "{}", out);
}

#[test]
fn assert_with_string_message() {
    let out = compile("x = 5\nassert x > 1, \"too small\"\n");
    assert!(out.contains("(unless (> x 1) (raise \"AssertionError: too small\" #t))"), "{}", out);
}

#[test]
fn typing_import_erases() {
    let out = compile("from typing import List\nx = 1\n");
    assert!(!out.contains("typing"), "{}", out);
}

#[test]
fn none_literal_is_a_symbol() {
    let out = compile("def f() -> None:\n    return None\n");
    assert!(out.contains("'NoneType"), "{}", out);
}

#[test]
fn implicit_return_none_is_synthesized_once() {
    let out = compile("def f() -> None:\n    x = 1\n");
    assert_eq!(out.matches("'NoneType").count(), 1, "{}", out);
}

#[test]
fn implicit_return_warns_on_non_none_return_type() {
    let source = Source::from_text("<test>", "def f() -> int:\n    x = 1\n");
    let stmts = parse_module(&source).unwrap();
    let mut builder = Builder::new();
    builder.compile(&stmts, true).unwrap();
    assert!(builder
        .warnings()
        .iter()
        .any(|w| w.message.contains("Implicitly added 'return None'")));
}

#[test]
fn booleans_lower_to_target_literals() {
    let out = compile("a = True\nb = False\n");
    assert!(out.contains("(define a #t)"), "{}", out);
    assert!(out.contains("(define b #f)"), "{}", out);
}

#[test]
fn string_quotes_are_escaped() {
    let out = compile("s = \"say \\\"hi\\\"\"\n");
    assert!(out.contains("\"say \\\"hi\\\"\""), "{}", out);
}

#[test]
fn literal_negation_folds_textually() {
    let out = compile("x = -5\ny = 1\nz = -y\n");
    assert!(out.contains("(define x -5)"), "{}", out);
    assert!(out.contains("(define z (- y))"), "{}", out);
}

#[test]
fn snippets_emit_in_stable_order() {
    let out = compile("xs = [1]\nb = 1 in xs\n");
    let require_at = out.find("(require data/gvector)").unwrap();
    let neq_at = out.find("(define (!= a b)").unwrap();
    let user_at = out.find("(define xs").unwrap();
    assert!(require_at < neq_at, "{}", out);
    assert!(neq_at < user_at, "{}", out);
}

mod files {
    use super::*;
    use std::io::Write;

    #[test]
    fn compiles_from_a_real_file() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        write!(input, "def f(x: int) -> int: return x + 1\nprint(f(1))\n").unwrap();
        let source = Source::from_file(input.path()).unwrap();
        let stmts = parse_module(&source).unwrap();
        let out = Builder::new().compile(&stmts, true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.rkt");
        std::fs::write(&out_path, &out).unwrap();
        let written = std::fs::read_to_string(&out_path).unwrap();
        assert!(written.starts_with("#lang racket"));
        assert!(written.contains("(PRINT (f 1))"));
    }
}
