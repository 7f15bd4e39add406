pub fn join_with<I: IntoIterator>(it: I, sep: &str) -> String where I::Item: ToString {
    it.into_iter().map(|t| t.to_string()).collect::<Vec<String>>().join(sep)
}

pub fn map_join<I: IntoIterator, T: ToString, F: FnMut(I::Item) -> T>(it: I, closure: F) -> String {
    it.into_iter().map(closure).map(|t| t.to_string()).collect::<Vec<String>>().join(", ")
}
