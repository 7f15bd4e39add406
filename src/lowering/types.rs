use std::fmt;
use std::rc::Rc;
use indexmap::IndexMap;
use crate::util::map_join;

/// The compile-time type of a value, as tracked while lowering.
///
/// `None` is the concrete none type (the `-> None` annotation); `NoneLiteral`
/// is the not-yet-pinned type of a bare `None` value, which merges away on
/// first contact with a concrete type. `Null` is the internal "statement
/// produced no value" sentinel and never describes a real value.
#[derive(Clone, Debug, PartialEq)]
pub enum Ty {
    Bool,
    Int,
    Float,
    Str,
    None,
    NoneLiteral,
    /// Element type plus whether this is a native range that can be iterated
    /// without the gvector adapter.
    List(Box<Ty>, bool),
    Tuple(Vec<Ty>),
    Function(Rc<FunctionTy>),
    Union(Vec<Ty>),
    Optional(Box<Ty>),
    Pending,
    Any,
    Null,
}

#[derive(Debug, PartialEq)]
pub struct FunctionTy {
    pub params: Vec<Ty>,
    pub kwparams: IndexMap<String, Ty>,
    pub vararg: bool,
    pub ret: Ty,
}

impl Ty {
    pub fn list(element: Ty) -> Ty {
        Ty::List(Box::new(element), false)
    }

    pub fn native_range(element: Ty) -> Ty {
        Ty::List(Box::new(element), true)
    }

    pub fn function(params: Vec<Ty>, kwparams: IndexMap<String, Ty>, vararg: bool, ret: Ty) -> Ty {
        Ty::Function(Rc::new(FunctionTy { params, kwparams, vararg, ret }))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    pub fn render(&self) -> String {
        match self {
            Ty::Bool => "bool".into(),
            Ty::Int => "int".into(),
            Ty::Float => "float".into(),
            Ty::Str => "str".into(),
            Ty::None | Ty::NoneLiteral => "None".into(),
            Ty::List(element, _) => format!("list[{}]", element.render()),
            Ty::Tuple(elements) => format!("tuple[{}]", map_join(elements, Ty::render)),
            Ty::Function(f) => {
                format!("({}) -> {}", map_join(&f.params, Ty::render), f.ret.render())
            }
            Ty::Union(alts) => format!("Union[{}]", map_join(alts, Ty::render)),
            Ty::Optional(inner) => format!("Optional[{}]", inner.render()),
            Ty::Pending => "<pending>".into(),
            Ty::Any => "Any".into(),
            Ty::Null => "<no value>".into(),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Whether a value of type `have` may be used where `want` is expected.
/// Sets `unsound_none` when acceptance rests on an unresolved `None` on the
/// have side, which the caller reports as a non-fatal diagnostic.
pub fn compatible(have: &Ty, want: &Ty, unsound_none: &mut bool) -> bool {
    // two uncommitted placeholders say nothing about each other
    if matches!(have, Ty::Pending) && matches!(want, Ty::Pending) {
        return false;
    }
    if have == want {
        return true;
    }
    if matches!(have, Ty::NoneLiteral) && matches!(want, Ty::None)
        || matches!(have, Ty::None) && matches!(want, Ty::NoneLiteral)
    {
        return true;
    }
    if matches!(have, Ty::Any) || matches!(want, Ty::Any) {
        return true;
    }
    if matches!(have, Ty::NoneLiteral) {
        *unsound_none = true;
        return true;
    }
    if matches!(want, Ty::NoneLiteral) {
        return true;
    }

    // a union source must fit entirely; a union target accepts any branch
    if let Ty::Union(alts) = have {
        return alts.iter().all(|alt| compatible(alt, want, unsound_none));
    }
    if let Ty::Union(alts) = want {
        return alts.iter().any(|alt| compatible(have, alt, unsound_none));
    }

    if let Ty::Optional(inner) = have {
        return match want {
            Ty::Optional(want_inner) => compatible(inner, want_inner, unsound_none),
            _ => false,
        };
    }
    if let Ty::Optional(inner) = want {
        return compatible(have, inner, unsound_none);
    }

    if let Ty::List(element, _) = have {
        return match want {
            Ty::List(want_element, _) => compatible(element, want_element, unsound_none),
            _ => false,
        };
    }
    if matches!(want, Ty::List(..)) {
        return false;
    }

    if matches!(have, Ty::Pending) {
        return !matches!(want, Ty::Pending);
    }
    if matches!(want, Ty::Pending) {
        return !matches!(have, Ty::Pending);
    }

    // widening an int where a float is wanted loses nothing; the reverse would
    matches!(have, Ty::Int) && matches!(want, Ty::Float)
}

/// Combines two inferred types without data loss. `symmetric` treats both
/// sides as equally authoritative (used for the branches of a conditional
/// expression); otherwise `t1` is the original type and `t2` the new one.
pub fn merge(t1: &Ty, t2: &Ty, symmetric: bool) -> Result<Ty, String> {
    if t1 == t2 {
        return Ok(t1.clone());
    }
    if t1.is_numeric() && t2.is_numeric() {
        return Ok(Ty::Float);
    }
    if matches!(t1, Ty::Pending) {
        return Ok(t2.clone());
    }
    if symmetric && matches!(t2, Ty::Pending) {
        return Ok(t1.clone());
    }
    if let (Ty::List(e1, _), Ty::List(e2, _)) = (t1, t2) {
        return Ok(Ty::list(merge(e1, e2, symmetric)?));
    }
    if matches!(t1, Ty::NoneLiteral) {
        return Ok(t2.clone());
    }
    if matches!(t2, Ty::NoneLiteral) {
        return Ok(t1.clone());
    }
    Err(format!("can not merge types {} and {}", t1, t2))
}

/// Container types that carry an unresolved element are "restricted": they
/// may seed a fresh binding, but pinning them down later takes an annotated
/// declaration.
pub fn is_restricted(ty: &Ty) -> bool {
    matches!(ty, Ty::List(..))
}

pub fn has_pending(ty: &Ty) -> bool {
    match ty {
        Ty::Pending => true,
        Ty::List(element, _) => has_pending(element),
        Ty::Tuple(elements) => elements.iter().any(has_pending),
        Ty::Optional(inner) => has_pending(inner),
        Ty::Union(alts) => alts.iter().any(has_pending),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn compat(have: &Ty, want: &Ty) -> bool {
        let mut unsound = false;
        compatible(have, want, &mut unsound)
    }

    #[test]
    fn int_widens_to_float_only() {
        assert!(compat(&Ty::Int, &Ty::Float));
        assert!(!compat(&Ty::Float, &Ty::Int));
    }

    #[test]
    fn identical_types_compatible() {
        for ty in [Ty::Bool, Ty::Int, Ty::Float, Ty::Str, Ty::None, Ty::list(Ty::Int)] {
            assert!(compat(&ty, &ty));
        }
    }

    #[test]
    fn any_is_a_wildcard() {
        assert!(compat(&Ty::Any, &Ty::Int));
        assert!(compat(&Ty::Str, &Ty::Any));
    }

    #[test]
    fn none_literal_is_a_warning_not_an_error() {
        let mut unsound = false;
        assert!(compatible(&Ty::NoneLiteral, &Ty::Int, &mut unsound));
        assert!(unsound);

        // against the concrete none type there is nothing unsound
        unsound = false;
        assert!(compatible(&Ty::NoneLiteral, &Ty::None, &mut unsound));
        assert!(!unsound);
    }

    #[test]
    fn union_source_needs_every_branch() {
        let u = Ty::Union(vec![Ty::Int, Ty::Float]);
        assert!(compat(&u, &Ty::Float));
        assert!(!compat(&Ty::Union(vec![Ty::Int, Ty::Str]), &Ty::Float));
    }

    #[test]
    fn union_target_accepts_any_branch() {
        let u = Ty::Union(vec![Ty::Int, Ty::Str]);
        assert!(compat(&Ty::Str, &u));
        assert!(!compat(&Ty::Float, &u));
    }

    #[test]
    fn optional_unwraps_one_level() {
        let opt_int = Ty::Optional(Box::new(Ty::Int));
        assert!(compat(&opt_int, &opt_int));
        assert!(compat(&Ty::Int, &opt_int));
        assert!(!compat(&opt_int, &Ty::Int));
    }

    #[test]
    fn lists_recurse_on_elements() {
        assert!(compat(&Ty::list(Ty::Int), &Ty::list(Ty::Float)));
        assert!(!compat(&Ty::list(Ty::Float), &Ty::list(Ty::Int)));
        assert!(!compat(&Ty::list(Ty::Int), &Ty::Int));
        assert!(!compat(&Ty::Int, &Ty::list(Ty::Int)));
    }

    #[test]
    fn pending_commits_to_anything_but_pending() {
        assert!(compat(&Ty::Pending, &Ty::Int));
        assert!(compat(&Ty::list(Ty::Int), &Ty::list(Ty::Pending)));
        assert!(!compat(&Ty::Pending, &Ty::Pending));
    }

    #[test]
    fn merge_is_idempotent() {
        for ty in [Ty::Int, Ty::Str, Ty::list(Ty::Float), Ty::None] {
            assert_eq!(merge(&ty, &ty, false).unwrap(), ty);
        }
    }

    #[test]
    fn merge_widens_numbers_both_ways() {
        assert_eq!(merge(&Ty::Int, &Ty::Float, false).unwrap(), Ty::Float);
        assert_eq!(merge(&Ty::Float, &Ty::Int, false).unwrap(), Ty::Float);
    }

    #[test]
    fn merge_resolves_pending() {
        assert_eq!(merge(&Ty::Pending, &Ty::Int, false).unwrap(), Ty::Int);
        assert_eq!(
            merge(&Ty::list(Ty::Pending), &Ty::list(Ty::Int), false).unwrap(),
            Ty::list(Ty::Int)
        );
        // only the symmetric form resolves a pending on the right
        assert!(merge(&Ty::Int, &Ty::Pending, false).is_err());
        assert_eq!(merge(&Ty::Int, &Ty::Pending, true).unwrap(), Ty::Int);
    }

    #[test]
    fn merge_resolves_none_literal() {
        assert_eq!(merge(&Ty::NoneLiteral, &Ty::Str, false).unwrap(), Ty::Str);
        assert_eq!(merge(&Ty::Str, &Ty::NoneLiteral, false).unwrap(), Ty::Str);
    }

    #[test]
    fn merge_rejects_unrelated_types() {
        assert!(merge(&Ty::Int, &Ty::Str, false).is_err());
        assert!(merge(&Ty::list(Ty::Int), &Ty::Str, false).is_err());
    }

    #[test]
    fn restricted_types() {
        assert!(is_restricted(&Ty::list(Ty::Pending)));
        assert!(!is_restricted(&Ty::Int));
        assert!(!is_restricted(&Ty::Tuple(vec![Ty::Int, Ty::Str])));
    }
}
