mod tests_eval;
