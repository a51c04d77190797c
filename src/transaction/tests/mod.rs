mod tests_isolation;
