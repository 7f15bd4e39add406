use indexmap::IndexMap;
use crate::lowering::types::Ty;

/// The return behaviours observed across the branches of one conditional:
/// a set over {returns, falls through} that must stay a singleton.
#[derive(Clone, Default, Debug)]
pub struct PathReturns {
    seen_returning: bool,
    seen_falling: bool,
}

impl PathReturns {
    pub fn insert(&mut self, did_return: bool) {
        if did_return {
            self.seen_returning = true;
        } else {
            self.seen_falling = true;
        }
    }

    pub fn is_mixed(&self) -> bool {
        self.seen_returning && self.seen_falling
    }

    /// The single agreed behaviour. Only meaningful once at least one branch
    /// was recorded and `is_mixed` is false.
    pub fn agreed(&self) -> bool {
        self.seen_returning
    }
}

/// Compiler-internal state local to one lexical frame. Every pushed frame
/// gets its own copy of the defaults; frames never share these.
#[derive(Clone, Debug)]
pub struct FrameFlags {
    /// declared return type of the enclosing function
    pub return_type: Ty,
    /// a `return` was lowered on the straight-line path
    pub did_return: bool,
    /// inside an active loop body
    pub in_loop: bool,
    /// inside a conditional branch body
    pub inner_body: bool,
    /// some conditional/loop holds the hoisting claim
    pub definitions_claim: bool,
    /// hoisted `(define name void)` forms owed to the claim holder
    pub definitions: Vec<String>,
    /// lower assignments without their initializer value
    pub skip_value: bool,
    /// resolve the produced value as an explicit boolean test
    pub resolve_truthy: bool,
    /// return behaviours seen on sibling branches
    pub path_returns: PathReturns,
}

impl Default for FrameFlags {
    fn default() -> FrameFlags {
        FrameFlags {
            return_type: Ty::NoneLiteral,
            did_return: false,
            in_loop: false,
            inner_body: false,
            definitions_claim: false,
            definitions: Vec::new(),
            skip_value: false,
            resolve_truthy: false,
            path_returns: PathReturns::default(),
        }
    }
}

pub struct Frame {
    bindings: IndexMap<String, Ty>,
    pub flags: FrameFlags,
}

impl Frame {
    fn new() -> Frame {
        Frame { bindings: IndexMap::new(), flags: FrameFlags::default() }
    }
}

/// The stack of lexical binding frames. The root frame is seeded once per
/// compile and lives for the whole compile; function entry pushes, function
/// exit pops. Conditionals and loops work within the existing frame.
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub fn new() -> ScopeStack {
        ScopeStack { frames: vec![Frame::new()] }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() == 1 {
            panic!("can not pop the root frame");
        }
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost-first search across all frames.
    pub fn get(&self, name: &str) -> Option<&Ty> {
        self.frames.iter().rev().find_map(|frame| frame.bindings.get(name))
    }

    pub fn get_local(&self, name: &str) -> Option<&Ty> {
        self.frames.last().unwrap().bindings.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.get_local(name).is_some()
    }

    pub fn set(&mut self, name: &str, ty: Ty) {
        self.frames.last_mut().unwrap().bindings.insert(name.to_owned(), ty);
    }

    /// Binds in the current frame and the immediately enclosing one, so a
    /// function is visible to its own body and to its caller's scope.
    pub fn set_propagating(&mut self, name: &str, ty: Ty) {
        let len = self.frames.len();
        self.frames[len - 1].bindings.insert(name.to_owned(), ty.clone());
        if len > 1 {
            self.frames[len - 2].bindings.insert(name.to_owned(), ty);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.frames.last_mut().unwrap().bindings.shift_remove(name);
    }

    /// Replaces the innermost binding of `name`, wherever it lives. No-op if
    /// the name is unbound.
    pub fn update(&mut self, name: &str, ty: Ty) {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.bindings.get_mut(name) {
                *slot = ty;
                return;
            }
        }
    }

    pub fn flags(&self) -> &FrameFlags {
        &self.frames.last().unwrap().flags
    }

    pub fn flags_mut(&mut self) -> &mut FrameFlags {
        &mut self.frames.last_mut().unwrap().flags
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lowering::types::Ty;

    #[test]
    fn lookup_is_innermost_first() {
        let mut scopes = ScopeStack::new();
        scopes.set("x", Ty::Int);
        scopes.push_frame();
        assert_eq!(scopes.get("x"), Some(&Ty::Int));
        assert!(scopes.get_local("x").is_none());
        scopes.set("x", Ty::Str);
        assert_eq!(scopes.get("x"), Some(&Ty::Str));
        scopes.pop_frame();
        assert_eq!(scopes.get("x"), Some(&Ty::Int));
    }

    #[test]
    fn propagating_set_reaches_the_caller() {
        let mut scopes = ScopeStack::new();
        scopes.push_frame();
        scopes.set_propagating("f", Ty::Int);
        assert!(scopes.has_local("f"));
        scopes.pop_frame();
        assert!(scopes.has("f"));
    }

    #[test]
    fn frames_do_not_share_flags() {
        let mut scopes = ScopeStack::new();
        scopes.flags_mut().in_loop = true;
        scopes.push_frame();
        assert!(!scopes.flags().in_loop);
        scopes.flags_mut().did_return = true;
        scopes.pop_frame();
        assert!(!scopes.flags().did_return);
        assert!(scopes.flags().in_loop);
    }

    #[test]
    fn remove_only_touches_the_current_frame() {
        let mut scopes = ScopeStack::new();
        scopes.set("x", Ty::Int);
        scopes.push_frame();
        scopes.set("x", Ty::Str);
        scopes.remove("x");
        assert_eq!(scopes.get("x"), Some(&Ty::Int));
    }

    #[test]
    fn path_returns_detects_mixed_behaviour() {
        let mut paths = PathReturns::default();
        paths.insert(true);
        assert!(!paths.is_mixed());
        assert!(paths.agreed());
        paths.insert(false);
        assert!(paths.is_mixed());
    }

    #[test]
    #[should_panic]
    fn root_frame_can_not_be_popped() {
        let mut scopes = ScopeStack::new();
        scopes.pop_frame();
    }
}
