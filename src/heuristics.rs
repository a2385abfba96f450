//! Rule-based explanations that need no model.
//!
//! [`HeuristicGenerator`] recognises common constructs in C, C++ and Python
//! and blends in the explanations of retrieved examples. It is the default
//! generator and the one used for offline runs.

use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Value, json};

use crate::llm::{ContextExample, GenerationRequest, Generator};

const PYTHON_INDICATORS: &[&str] = &[
    "def ", "self", "import ", "from ", "none", "async def", "print(", "lambda ",
    "if __name__", "elif ", "else:",
];

const CPP_INDICATORS: &[&str] = &[
    "std::", "cout", "cin", "namespace", "template<", "using namespace", "class ",
    "public:", "private:", "::",
];

const C_INDICATORS: &[&str] = &[
    "printf", "scanf", "#include <stdio.h>", "#include <stdlib.h>", "malloc", "free",
    "calloc", "realloc",
];

lazy_static! {
    static ref FUNCTION_DEF: Regex =
        Regex::new(r"^(def|int|void|float|double|char|bool)\s+(\w+)\s*\(").unwrap();
    static ref ANY_FUNCTION_DEF: Regex =
        Regex::new(r"\b(def|function|int|void)\s+(\w+)\s*\(").unwrap();
    static ref PARAMS: Regex = Regex::new(r"\(([^)]*)\)").unwrap();
    static ref DECLARATION: Regex =
        Regex::new(r"^(int|float|double|char|bool|var|let|const)\s+(\w+)\s*[=:]\s*(.+)").unwrap();
    static ref BARE_DECLARATION: Regex =
        Regex::new(r"^(int|float|double|char|bool|var|let|const)\s+\w+").unwrap();
    static ref CALL: Regex = Regex::new(r"(\w+)\s*\(").unwrap();
    static ref NAMED_DEFINITION: Regex =
        Regex::new(r"\b(def|function|int|void|class)\s+(\w+)").unwrap();
}

/// Guesses a snippet's language from tell-tale tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanguageDetector;

impl LanguageDetector {
    pub fn detect(&self, code: &str) -> &'static str {
        let lowered = code.to_lowercase();
        let has_any = |indicators: &[&str]| indicators.iter().any(|i| lowered.contains(i));

        if has_any(PYTHON_INDICATORS) {
            if code.contains("class ") && code.contains('{') && code.contains("::") {
                return "c++";
            }
            return "python";
        }
        if has_any(CPP_INDICATORS) {
            return "c++";
        }
        if has_any(C_INDICATORS) {
            return "c";
        }
        if code.contains("#include") {
            if (code.contains("class ") && code.contains('{'))
                || code.contains("namespace")
                || code.contains("template")
            {
                return "c++";
            }
            return "c";
        }
        if code.contains("class ") && code.contains(':') && !code.contains('{') {
            return "python";
        }
        "c"
    }
}

/// Offline [`Generator`] built from pattern rules.
#[derive(Debug, Default)]
pub struct HeuristicGenerator {
    detector: LanguageDetector,
}

impl HeuristicGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces the explanation payload synchronously.
    pub fn explain(&self, request: &GenerationRequest) -> Value {
        let code = request.code.as_str();
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| self.detector.detect(code).to_string());

        let mut reasoning = vec![
            match &request.language {
                Some(_) => format!("Language provided by caller: {language}"),
                None => format!("Detected language: {language}"),
            },
            format!("Analyzed code structure: {}", structure_features(code)),
            format!(
                "Retrieved {} reference snippet(s) from knowledge base",
                request.examples.len()
            ),
        ];

        let line_by_line = explain_lines(code, &language);

        let summary = if request.examples.is_empty() {
            reasoning.push("No close references found, using heuristic analysis.".to_string());
            fallback_summary(&language, code)
        } else {
            let patterns = identify_patterns(code, &language);
            reasoning.push(format!("Identified primary purpose: {}", infer_intent(code)));
            let keywords = extract_keywords(code);
            if !keywords.is_empty() {
                reasoning.push(format!("Key terms: {}", keywords.join(", ")));
            }
            reasoning.push(format!("Pattern recognition: {patterns}"));
            contextual_summary(code, &language, &patterns, &request.examples)
        };

        json!({
            "language": language,
            "summary": summary,
            "reasoning": reasoning,
            "line_by_line": line_by_line,
        })
    }
}

#[async_trait]
impl Generator for HeuristicGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        Ok(self.explain(request))
    }

    fn model_name(&self) -> &str {
        "heuristic"
    }
}

fn explain_lines(code: &str, language: &str) -> Vec<Value> {
    let lines: Vec<&str> = code.lines().collect();
    let defined = defined_functions(&lines);

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let stripped = line.trim();
            let explanation = if stripped.is_empty() {
                "Empty line (whitespace for readability)".to_string()
            } else if is_comment_only(stripped, language) {
                explain_comment(stripped)
            } else {
                explain_line(stripped, language, &defined)
            };
            json!({
                "line_number": i + 1,
                "code": line,
                "explanation": explanation,
            })
        })
        .collect()
}

fn defined_functions(lines: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| FUNCTION_DEF.captures(line.trim()))
        .map(|caps| caps[2].to_string())
        .collect()
}

fn is_comment_only(line: &str, language: &str) -> bool {
    match language {
        "c" | "c++" => line.starts_with("//") || line.starts_with("/*"),
        "python" => line.starts_with('#'),
        _ => false,
    }
}

fn explain_comment(line: &str) -> String {
    let text = line.trim_start_matches(['#', '/', '*']).trim();
    if text.is_empty() {
        "Comment line for code documentation".to_string()
    } else {
        format!("Comment: {text}")
    }
}

fn explain_line(stripped: &str, language: &str, defined: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(rest) = stripped.strip_prefix("#include") {
        let lib = rest.trim().trim_matches(['<', '>', '"']);
        parts.push(format!("Includes the {lib} header"));
        if lib.contains("stdio.h") {
            parts.push("for input/output operations like printf and scanf".to_string());
        } else if lib.contains("stdlib.h") {
            parts.push("for memory management and utility functions".to_string());
        }
    } else if let Some(caps) = FUNCTION_DEF.captures(stripped) {
        let (kind, name) = (&caps[1], &caps[2]);
        if kind == "def" {
            parts.push(format!("Defines a Python function named '{name}'"));
        } else {
            parts.push(format!("Defines a {kind} function named '{name}'"));
        }
        match PARAMS.captures(stripped).map(|p| p[1].trim().to_string()) {
            Some(params) if !params.is_empty() => {
                parts.push(format!("that takes parameters: {params}"))
            }
            _ => parts.push("that takes no parameters".to_string()),
        }
    } else if let Some(expr) = stripped.strip_prefix("return ") {
        let expr = expr.trim().trim_end_matches(';');
        let lowered = expr.to_lowercase();
        if expr == "0" {
            parts.push("Returns 0 to indicate successful program termination".to_string());
        } else if matches!(expr, "n" | "1" | "-1") {
            parts.push(format!(
                "Returns the value {expr}, typically used as a base case or result"
            ));
        } else if lowered.contains("fib") {
            parts.push("Recursively returns the sum of two previous Fibonacci numbers".to_string());
        } else {
            parts.push(format!("Returns the result: {expr}"));
        }
    } else if let Some(condition) = stripped.strip_prefix("if ") {
        let condition = condition.trim().trim_matches(['(', ')', ':', '{', ' ']);
        if condition.contains("n <= 1") || condition.contains("n < 2") {
            parts.push("Base case check: if n is 0 or 1, return n directly".to_string());
            parts.push("This prevents infinite recursion in Fibonacci calculation".to_string());
        } else if condition.contains(" in ") && language == "python" {
            parts.push(format!("Checks if an element exists in a collection: {condition}"));
        } else {
            parts.push(format!("Conditional check: {condition}"));
            parts.push("If true, executes the following block".to_string());
        }
    } else if BARE_DECLARATION.is_match(stripped) {
        if let Some(caps) = DECLARATION.captures(stripped) {
            let value = caps[3].trim().trim_end_matches(';');
            parts.push(format!(
                "Declares {} '{}' and initializes it to {value}",
                &caps[1], &caps[2]
            ));
        }
    } else if stripped.starts_with("for ") || stripped.starts_with("for(") {
        if stripped.contains("in range") {
            parts.push("Iterates over a range of numbers".to_string());
        } else if stripped.contains(" in ") && language == "python" {
            parts.push("Iterates over elements in a collection".to_string());
        } else {
            parts.push(
                "Traditional for loop with initialization, condition, and increment".to_string(),
            );
        }
    } else if stripped.starts_with("while ") || stripped.starts_with("while(") {
        parts.push("While loop: continues executing while condition is true".to_string());
    } else if stripped.contains("printf") {
        parts.push("Prints formatted output to the console".to_string());
    } else if stripped.contains("cout") {
        parts.push("C++ output stream: sends data to standard output".to_string());
    } else if stripped.contains("print(") {
        parts.push("Python print function: displays output to console".to_string());
    } else if !stripped.contains('=') && CALL.is_match(stripped) {
        if let Some(caps) = CALL.captures(stripped) {
            let name = &caps[1];
            if defined.iter().any(|d| d == name) {
                parts.push(format!("Recursive call to '{name}' function"));
                parts.push("This function calls itself with modified parameters".to_string());
            }
        }
    } else if stripped.to_lowercase().contains("fib")
        && ['+', '-', '*', '/', '%'].iter().any(|op| stripped.contains(*op))
    {
        parts.push("Calculates Fibonacci by summing two recursive calls".to_string());
        parts.push("F(n) = F(n-1) + F(n-2)".to_string());
    }

    if parts.is_empty() {
        parts.push(generic_line_explanation(stripped, language));
    }
    format!("{}.", parts.join(". "))
}

fn generic_line_explanation(line: &str, language: &str) -> String {
    if line.contains('{') {
        "Opens a code block".to_string()
    } else if line.contains('}') {
        "Closes a code block".to_string()
    } else if line.contains(';') && matches!(language, "c" | "c++") {
        "Statement terminator (semicolon ends the statement)".to_string()
    } else if line.contains(':') && language == "python" {
        "Python block indicator (colon starts a new block)".to_string()
    } else {
        format!("Executes: {}", crate::utils::truncate_chars(line, 50))
    }
}

/// Comma-separated list of structural features found in the code.
pub fn structure_features(code: &str) -> String {
    let mut features = Vec::new();
    if ANY_FUNCTION_DEF.is_match(code) {
        features.push("function definition");
    }
    if code.contains("if ") || code.contains("if(") {
        features.push("conditional logic");
    }
    if code.contains("for ") || code.contains("while ") {
        features.push("loop construct");
    }
    if code.contains("return ") {
        features.push("return statement");
    }
    if code.contains("class ") {
        features.push("class definition");
    }
    if code.contains('*') && (code.contains("int") || code.contains("char")) {
        features.push("pointer usage");
    }
    if code.contains('[') && code.contains(']') {
        features.push("array/indexing");
    }

    if features.is_empty() {
        "basic structure".to_string()
    } else {
        features.join(", ")
    }
}

/// Identifiers and algorithm names worth mentioning.
pub fn extract_keywords(code: &str) -> Vec<String> {
    let lowered = code.to_lowercase();
    let mut keywords: Vec<String> = NAMED_DEFINITION
        .captures_iter(code)
        .map(|caps| caps[2].to_string())
        .collect();
    keywords.extend(
        ["sort", "search", "fibonacci", "graph", "tree", "hash", "stack", "queue"]
            .iter()
            .filter(|kw| lowered.contains(*kw))
            .map(|kw| kw.to_string()),
    );
    keywords
}

/// Best guess at what the code is for.
pub fn infer_intent(code: &str) -> &'static str {
    let lowered = code.to_lowercase();
    let has = |needle: &str| lowered.contains(needle);

    if has("fibonacci") || has("fib") {
        "a recursive Fibonacci sequence generator that calculates the nth Fibonacci number using F(n) = F(n-1) + F(n-2) with base cases for n <= 1"
    } else if has("quicksort") || (has("sort") && has("pivot")) {
        "the Quicksort algorithm, a divide-and-conquer sorting method that partitions arrays around a pivot element"
    } else if has("mergesort") || (has("sort") && has("merge")) {
        "the Mergesort algorithm, which divides arrays into halves and merges sorted subarrays"
    } else if has("binary") && has("search") {
        "binary search, an efficient O(log n) search algorithm for sorted arrays"
    } else if has("graph") || (has("node") && has("neighbor")) {
        "graph traversal, likely using depth-first or breadth-first search to visit all nodes"
    } else if has("tree") && (has("node") || has("leaf")) {
        "tree data structure operations, such as traversal or node manipulation"
    } else if has("stack") || (has("push") && has("pop")) {
        "stack data structure with LIFO (Last In First Out) operations"
    } else if has("queue") || (has("enqueue") && has("dequeue")) {
        "queue data structure with FIFO (First In First Out) operations"
    } else if has("swap") {
        "a value swapping utility that exchanges two variables, often using temporary storage or pointer manipulation"
    } else if has("reverse") {
        "string or array reversal algorithm"
    } else if has("factorial") || has("fact") {
        "factorial calculation, typically using recursion"
    } else if has("malloc") || has("new ") {
        "dynamic memory allocation"
    } else if has("free") || has("delete ") {
        "memory deallocation and resource cleanup"
    } else if code.contains("class ") && (has("__init__") || has("constructor")) {
        "an object-oriented class definition with initialization logic"
    } else if code.contains("template") {
        "generic programming using templates for type-independent code"
    } else if code.contains("main()") || code.contains("int main") {
        "a main program entry point that orchestrates function calls and program execution"
    } else {
        "core algorithmic logic with specific computational steps"
    }
}

fn structure_description(code: &str) -> String {
    let mut desc = Vec::new();

    if let Some(caps) = ANY_FUNCTION_DEF.captures(code) {
        let name = &caps[2];
        desc.push(format!("defines function '{name}'"));
        let whole = caps.get(0).map_or("", |m| m.as_str());
        if code.replacen(whole, "", 1).contains(name) {
            desc.push("uses recursive calls".to_string());
        }
    }
    if code.contains("for ") || code.contains("while ") {
        desc.push("contains iterative loops".to_string());
    }
    let if_count = code.matches("if ").count();
    if if_count > 0 {
        let suffix = if if_count > 1 { "es" } else { "" };
        desc.push(format!("has {if_count} conditional branch{suffix}"));
    }

    if desc.is_empty() {
        String::new()
    } else {
        format!("The code {}.", desc.join(", "))
    }
}

fn identify_patterns(code: &str, language: &str) -> String {
    let lowered = code.to_lowercase();
    let mut patterns = Vec::new();

    if lowered.contains("fib") {
        patterns.push("Fibonacci sequence calculation");
    }
    if lowered.contains("sort") {
        patterns.push("sorting algorithm");
    }
    if lowered.contains("search") || lowered.contains("find") {
        patterns.push("search algorithm");
    }
    if lowered.contains("graph") || lowered.contains("node") {
        patterns.push("graph data structure");
    }
    if code.contains("class ") && matches!(language, "python" | "c++") {
        patterns.push("object-oriented design");
    }
    if code.contains("template") {
        patterns.push("generic programming");
    }
    if code.contains('*') && matches!(language, "c" | "c++") {
        patterns.push("pointer manipulation");
    }
    if code.matches("return").count() > 1 {
        patterns.push("early return pattern");
    }
    if code.contains("if ") && code.contains("else") {
        patterns.push("conditional branching");
    }

    if patterns.is_empty() {
        "Standard implementation pattern".to_string()
    } else {
        format!("Identified patterns: {}", patterns.join(", "))
    }
}

fn contextual_summary(code: &str, language: &str, patterns: &str, examples: &[ContextExample]) -> String {
    let mut parts = vec![
        format!("This {language} code implements {}.", infer_intent(code)),
        structure_description(code),
        format!("{patterns}."),
    ];

    let insights: Vec<&str> = examples
        .iter()
        .map(|ex| ex.explanation.trim())
        .filter(|text| !text.is_empty())
        .take(2)
        .collect();
    if !insights.is_empty() {
        parts.push(format!(
            "Similar patterns in the knowledge base suggest: {}.",
            insights.join("; ")
        ));
    }

    parts.retain(|part| !part.is_empty());
    parts.join(" ")
}

fn fallback_summary(language: &str, code: &str) -> String {
    format!(
        "This {language} code implements {}. The implementation uses {}. \
         While no close matches were found in the knowledge base, the code follows \
         standard {language} conventions and demonstrates common programming patterns.",
        infer_intent(code),
        structure_features(code)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Query;

    const C_FIB: &str = "#include <stdio.h>\n\nint fib(int n) {\n    if (n <= 1) return n;\n    return fib(n - 1) + fib(n - 2);\n}\n";

    fn request(code: &str, language: Option<&str>, examples: Vec<ContextExample>) -> GenerationRequest {
        let query = Query::new(code, language);
        let mut request = GenerationRequest::build(&query, &Vec::new());
        request.examples = examples;
        request
    }

    #[test]
    fn test_detect_language() {
        let detector = LanguageDetector;
        assert_eq!(detector.detect("def add(a, b):\n    return a + b"), "python");
        assert_eq!(detector.detect("std::vector<int> v;"), "c++");
        assert_eq!(detector.detect("int *p = malloc(sizeof(int));"), "c");
        assert_eq!(detector.detect("#include <iostream>\nnamespace app {}"), "c++");
        assert_eq!(detector.detect("x = y"), "c");
    }

    #[test]
    fn test_every_line_is_explained_in_order() {
        let generator = HeuristicGenerator::new();
        let payload = generator.explain(&request(C_FIB, None, Vec::new()));

        let lines = payload["line_by_line"].as_array().unwrap();
        assert_eq!(lines.len(), C_FIB.lines().count());
        for (i, entry) in lines.iter().enumerate() {
            assert_eq!(entry["line_number"], i + 1);
        }
        assert_eq!(payload["language"], "c");
        assert!(lines[0]["explanation"].as_str().unwrap().contains("stdio.h"));
        assert!(lines[1]["explanation"].as_str().unwrap().starts_with("Empty line"));
        assert!(lines[2]["explanation"].as_str().unwrap().contains("function named 'fib'"));
    }

    #[test]
    fn test_hint_is_used_instead_of_detection() {
        let generator = HeuristicGenerator::new();
        let payload = generator.explain(&request("x = compute(y)\n", Some("ruby"), Vec::new()));
        assert_eq!(payload["language"], "ruby");
        assert_eq!(payload["reasoning"][0], "Language provided by caller: ruby");
    }

    #[test]
    fn test_fallback_summary_without_examples() {
        let generator = HeuristicGenerator::new();
        let payload = generator.explain(&request(C_FIB, Some("c"), Vec::new()));
        let summary = payload["summary"].as_str().unwrap();
        assert!(summary.contains("no close matches"));
        let reasoning = payload["reasoning"].as_array().unwrap();
        assert!(reasoning.iter().any(|r| r.as_str().unwrap().starts_with("No close references")));
    }

    #[test]
    fn test_summary_folds_in_examples() {
        let generator = HeuristicGenerator::new();
        let examples = vec![ContextExample {
            id: "c-fib".to_string(),
            title: "Fibonacci".to_string(),
            language: "c".to_string(),
            code_fragment: "int fib(int n);".to_string(),
            explanation: "Recursion with two base cases".to_string(),
            score: 0.9,
        }];
        let payload = generator.explain(&request(C_FIB, Some("c"), examples));
        let summary = payload["summary"].as_str().unwrap();
        assert!(summary.contains("Fibonacci"));
        assert!(summary.contains("Recursion with two base cases"));
        assert!(summary.contains("uses recursive calls"));
    }

    #[test]
    fn test_python_lines() {
        let code = "# compute squares\nfor i in range(10):\n    print(i * i)\n";
        let explanations: Vec<String> = explain_lines(code, "python")
            .into_iter()
            .map(|v| v["explanation"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(explanations[0], "Comment: compute squares");
        assert_eq!(explanations[1], "Iterates over a range of numbers.");
        assert_eq!(explanations[2], "Python print function: displays output to console.");
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("void bubble_sort(int *a) {}\nclass Stack:");
        assert_eq!(keywords, vec!["bubble_sort", "Stack", "sort", "stack"]);
    }
}
