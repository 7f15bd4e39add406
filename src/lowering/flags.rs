use indexmap::IndexSet;

/// Optional runtime capabilities the lowering rules can request. Each one
/// maps to a support snippet emitted ahead of the user code.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BuildFlag {
    NameIsMain,
    Print,
    Equal,
    NotEqual,
    In,
    Input,
    GvectorRequire,
    Gvector,
    DeepCopy,
    ToInt,
    ToFloat,
    ToStr,
    ToBool,
    ToList,
}

/// The order the snippets appear in the output, chosen so every helper is
/// defined before its first use.
const ASSEMBLY_ORDER: [BuildFlag; 14] = [
    BuildFlag::NameIsMain,
    BuildFlag::GvectorRequire,
    BuildFlag::Gvector,
    BuildFlag::DeepCopy,
    BuildFlag::Print,
    BuildFlag::Equal,
    BuildFlag::NotEqual,
    BuildFlag::In,
    BuildFlag::Input,
    BuildFlag::ToInt,
    BuildFlag::ToFloat,
    BuildFlag::ToStr,
    BuildFlag::ToBool,
    BuildFlag::ToList,
];

impl BuildFlag {
    /// The flags this one transitively depends on.
    pub fn requires(&self) -> &'static [BuildFlag] {
        match self {
            BuildFlag::In => &[BuildFlag::GvectorRequire, BuildFlag::NotEqual],
            BuildFlag::Gvector => &[BuildFlag::GvectorRequire],
            BuildFlag::DeepCopy => &[BuildFlag::GvectorRequire],
            BuildFlag::ToBool => &[BuildFlag::NotEqual],
            BuildFlag::ToList => &[BuildFlag::GvectorRequire],
            _ => &[],
        }
    }

    pub fn snippet(&self) -> &'static str {
        match self {
            BuildFlag::NameIsMain => r#"(define __name__ "__main__")"#,
            BuildFlag::Print => {
                r#"(define (PRINT . args) (for-each (lambda (x i) (unless (= i 0) (display " ")) (display x)) args (range (length args)))(newline))"#
            }
            BuildFlag::Equal => {
                r#"(define (== a b) (if (and (number? a) (number? b)) (= a b) (equal? a b)))"#
            }
            BuildFlag::NotEqual => {
                r#"(define (!= a b) (if (and (number? a) (number? b)) (not (= a b)) (not (equal? a b))))"#
            }
            BuildFlag::In => {
                r#"(define (in? elem coll) (cond ((gvector? coll) (!= (vector-member elem (gvector->vector coll)) #f)) ((vector? coll) (!= (vector-member elem coll) #f)) (else (raise "Argument is not iterable" #t))))"#
            }
            BuildFlag::Input => r#"(define (input prompt) (display prompt)(read-line))"#,
            BuildFlag::GvectorRequire => r#"(require data/gvector)"#,
            BuildFlag::Gvector => {
                "(define (safe-gvector-set! vec i elm) (if (< i (gvector-count vec)) (gvector-set! vec i elm) (raise \"IndexError: list assignment index out of range\" #t)))\n(define (gvector-pop! vec i) (define ret (gvector-ref vec i)) (gvector-remove! vec i)ret)\n(define (gvector-access vec i) (if (>= i 0) (gvector-ref vec i) (gvector-ref vec (+ (gvector-count vec) i))))"
            }
            BuildFlag::DeepCopy => {
                r#"(define (deepcopy var) (cond ((gvector? var) (apply gvector (gvector->list var))) ((vector? var) (apply vector-immutable (vector var))) (else var)))"#
            }
            BuildFlag::ToInt => {
                r#"(define (int x)(cond ((number? x) (exact-floor x)) ((string? x) (exact-floor (string->number x))) ((boolean? x) (if x 1 0))))"#
            }
            BuildFlag::ToFloat => {
                r#"(define (float x)(cond ((number? x) (exact->inexact x)) ((string? x) (exact->inexact (string->number x))) ((boolean? x) (if x 1.0 0.0))))"#
            }
            BuildFlag::ToStr => {
                r#"(define (str x)(cond ((number? x) (number->string x)) ((string? x) x) ((boolean? x) (if x "True" "False"))))"#
            }
            BuildFlag::ToBool => {
                r#"(define (bool x)(cond ((number? x) (!= x 0)) ((string? x) (!= x "")) ((boolean? x) x)))"#
            }
            BuildFlag::ToList => {
                r#"(define (toList x) (cond ((gvector? x) (gvector->list x)) ((vector? x) (vector->list x)) (else (raise "Can not convert object to list" #t))))"#
            }
        }
    }
}

/// The set of capabilities the lowering rules actually triggered. Read once
/// at final assembly, after closing it under the requirement table.
pub struct BuildFlags {
    active: IndexSet<BuildFlag>,
}

impl BuildFlags {
    pub fn new() -> BuildFlags {
        let mut active = IndexSet::new();
        active.insert(BuildFlag::NameIsMain);
        BuildFlags { active }
    }

    pub fn set(&mut self, flag: BuildFlag) {
        self.active.insert(flag);
    }

    pub fn is_set(&self, flag: BuildFlag) -> bool {
        self.active.contains(&flag)
    }

    /// Fixpoint of the requirement table over the active set.
    pub fn closure(&self) -> IndexSet<BuildFlag> {
        let mut closed = IndexSet::new();
        let mut queue: Vec<BuildFlag> = self.active.iter().copied().collect();
        while let Some(flag) = queue.pop() {
            if closed.insert(flag) {
                for required in flag.requires() {
                    if !closed.contains(required) {
                        queue.push(*required);
                    }
                }
            }
        }
        closed
    }

    /// The runtime support preamble, one snippet per closed flag, in the
    /// fixed assembly order.
    pub fn preamble(&self) -> String {
        let closed = self.closure();
        let mut out = String::new();
        for flag in ASSEMBLY_ORDER {
            if closed.contains(&flag) {
                out.push_str(flag.snippet());
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_is_main_is_on_by_default() {
        let flags = BuildFlags::new();
        assert!(flags.closure().contains(&BuildFlag::NameIsMain));
    }

    #[test]
    fn closure_pulls_in_requirements() {
        let mut flags = BuildFlags::new();
        flags.set(BuildFlag::In);
        let closed = flags.closure();
        assert!(closed.contains(&BuildFlag::GvectorRequire));
        assert!(closed.contains(&BuildFlag::NotEqual));
    }

    #[test]
    fn closure_is_transitive() {
        let mut flags = BuildFlags::new();
        flags.set(BuildFlag::ToBool);
        assert!(flags.closure().contains(&BuildFlag::NotEqual));
    }

    #[test]
    fn preamble_orders_requires_first() {
        let mut flags = BuildFlags::new();
        flags.set(BuildFlag::Gvector);
        let preamble = flags.preamble();
        let require_at = preamble.find("(require data/gvector)").unwrap();
        let helper_at = preamble.find("safe-gvector-set!").unwrap();
        assert!(require_at < helper_at);
    }

    #[test]
    fn preamble_skips_inactive_snippets() {
        let flags = BuildFlags::new();
        let preamble = flags.preamble();
        assert!(!preamble.contains("PRINT"));
        assert!(preamble.contains("__name__"));
    }
}
