/// Running concatenation of response fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerAccumulator {
    answer: String,
    fragments: usize,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and returns the answer so far.
    pub fn push(&mut self, fragment: &str) -> &str {
        self.answer.push_str(fragment);
        self.fragments += 1;
        &self.answer
    }

    pub fn as_str(&self) -> &str {
        &self.answer
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn into_answer(self) -> String {
        self.answer
    }
}
