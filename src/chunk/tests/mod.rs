mod tests_corpus;
mod tests_freeze;
