//! Filesystem Tools
//!
//! Stateless handlers over the local filesystem. All paths accept `~`.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use glob::Pattern;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

use super::{
    blocking, expand_path, object_schema, parse_args, tool, truncate_chars, ToolError,
    ToolProvider, ToolResult, Toolset,
};
use crate::mcp::types::Tool;

const MAX_ENTRIES_PER_DIR: usize = 200;
const DEFAULT_READ_LINES: usize = 1000;
const MULTI_READ_MAX_CHARS: usize = 100_000;

/// Handlers for the filesystem toolset
#[derive(Debug, Default)]
pub struct FilesystemTools;

impl FilesystemTools {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolProvider for FilesystemTools {
    fn toolset(&self) -> Toolset {
        Toolset::Filesystem
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            tool(
                "list_directory",
                "List directory contents, optionally recursing up to `depth` levels.",
                object_schema(
                    json!({
                        "path": { "type": "string", "default": "~" },
                        "depth": { "type": "integer", "default": 1, "minimum": 1 }
                    }),
                    &[],
                ),
            ),
            tool(
                "read_file",
                "Read a window of lines from a text file.",
                object_schema(
                    json!({
                        "path": { "type": "string" },
                        "offset": { "type": "integer", "default": 0, "description": "Negative reads from the end" },
                        "length": { "type": "integer", "default": DEFAULT_READ_LINES },
                        "head": { "type": "integer" },
                        "tail": { "type": "integer" }
                    }),
                    &["path"],
                ),
            ),
            tool(
                "read_multiple_files",
                "Read several files at once; each result succeeds or fails independently.",
                object_schema(
                    json!({
                        "paths": { "type": "array", "items": { "type": "string" } }
                    }),
                    &["paths"],
                ),
            ),
            tool(
                "write_file",
                "Write or append text to a file, creating parent directories.",
                object_schema(
                    json!({
                        "path": { "type": "string" },
                        "content": { "type": "string" },
                        "mode": { "type": "string", "enum": ["rewrite", "append"], "default": "rewrite" }
                    }),
                    &["path", "content"],
                ),
            ),
            tool(
                "edit_block",
                "Replace every occurrence of `old_string`, failing unless exactly `expected_replacements` exist.",
                object_schema(
                    json!({
                        "file_path": { "type": "string" },
                        "old_string": { "type": "string" },
                        "new_string": { "type": "string", "default": "" },
                        "expected_replacements": { "type": "integer", "default": 1 }
                    }),
                    &["file_path", "old_string"],
                ),
            ),
            tool(
                "create_directory",
                "Create a directory and any missing parents.",
                object_schema(json!({ "path": { "type": "string" } }), &["path"]),
            ),
            tool(
                "move_file",
                "Move or rename a file or directory.",
                object_schema(
                    json!({
                        "source": { "type": "string" },
                        "destination": { "type": "string" }
                    }),
                    &["source", "destination"],
                ),
            ),
            tool(
                "copy_file",
                "Copy a file, or a directory recursively.",
                object_schema(
                    json!({
                        "source": { "type": "string" },
                        "destination": { "type": "string" }
                    }),
                    &["source", "destination"],
                ),
            ),
            tool(
                "delete_path",
                "Delete a file or a directory tree.",
                object_schema(json!({ "path": { "type": "string" } }), &["path"]),
            ),
            tool(
                "search_files",
                "Find files and directories whose name contains `pattern` (case-insensitive).",
                object_schema(
                    json!({
                        "path": { "type": "string" },
                        "pattern": { "type": "string" },
                        "max_results": { "type": "integer", "default": 100 },
                        "include_hidden": { "type": "boolean", "default": false }
                    }),
                    &["path", "pattern"],
                ),
            ),
            tool(
                "search_content",
                "Search file contents for `pattern` (case-insensitive) with surrounding context.",
                object_schema(
                    json!({
                        "path": { "type": "string" },
                        "pattern": { "type": "string" },
                        "file_pattern": { "type": "string", "default": "*" },
                        "max_results": { "type": "integer", "default": 50 },
                        "context_lines": { "type": "integer", "default": 2 }
                    }),
                    &["path", "pattern"],
                ),
            ),
            tool(
                "get_file_info",
                "Report existence, kind, size and timestamps of a path.",
                object_schema(json!({ "path": { "type": "string" } }), &["path"]),
            ),
        ]
    }

    async fn call(&self, name: &str, args: Value) -> ToolResult<Value> {
        match name {
            "list_directory" => {
                let args: ListDirectoryArgs = parse_args(args)?;
                blocking(move || list_directory(args)).await
            }
            "read_file" => {
                let args: ReadFileArgs = parse_args(args)?;
                blocking(move || read_file(args)).await
            }
            "read_multiple_files" => {
                let args: ReadMultipleArgs = parse_args(args)?;
                blocking(move || Ok(read_multiple_files(args))).await
            }
            "write_file" => {
                let args: WriteFileArgs = parse_args(args)?;
                blocking(move || write_file(args)).await
            }
            "edit_block" => {
                let args: EditBlockArgs = parse_args(args)?;
                blocking(move || edit_block(args)).await
            }
            "create_directory" => {
                let args: PathArgs = parse_args(args)?;
                blocking(move || create_directory(args)).await
            }
            "move_file" => {
                let args: TransferArgs = parse_args(args)?;
                blocking(move || move_path(args)).await
            }
            "copy_file" => {
                let args: TransferArgs = parse_args(args)?;
                blocking(move || copy_path(args)).await
            }
            "delete_path" => {
                let args: PathArgs = parse_args(args)?;
                blocking(move || delete_path(args)).await
            }
            "search_files" => {
                let args: SearchFilesArgs = parse_args(args)?;
                blocking(move || search_files(args)).await
            }
            "search_content" => {
                let args: SearchContentArgs = parse_args(args)?;
                blocking(move || search_content(args)).await
            }
            "get_file_info" => {
                let args: PathArgs = parse_args(args)?;
                blocking(move || get_file_info(args)).await
            }
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

fn default_home() -> String {
    "~".to_string()
}

fn default_depth() -> usize {
    1
}

fn default_read_length() -> usize {
    DEFAULT_READ_LINES
}

fn default_mode() -> String {
    "rewrite".to_string()
}

fn default_one() -> usize {
    1
}

fn default_search_files_max() -> usize {
    100
}

fn default_search_content_max() -> usize {
    50
}

fn default_context_lines() -> usize {
    2
}

fn default_file_pattern() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize)]
struct ListDirectoryArgs {
    #[serde(default = "default_home")]
    path: String,
    #[serde(default = "default_depth")]
    depth: usize,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_read_length")]
    length: usize,
    head: Option<usize>,
    tail: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ReadMultipleArgs {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
    #[serde(default = "default_mode")]
    mode: String,
}

#[derive(Debug, Deserialize)]
struct EditBlockArgs {
    file_path: String,
    old_string: String,
    #[serde(default)]
    new_string: String,
    #[serde(default = "default_one")]
    expected_replacements: usize,
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct TransferArgs {
    source: String,
    destination: String,
}

#[derive(Debug, Deserialize)]
struct SearchFilesArgs {
    path: String,
    pattern: String,
    #[serde(default = "default_search_files_max")]
    max_results: usize,
    #[serde(default)]
    include_hidden: bool,
}

#[derive(Debug, Deserialize)]
struct SearchContentArgs {
    path: String,
    pattern: String,
    #[serde(default = "default_file_pattern")]
    file_pattern: String,
    #[serde(default = "default_search_content_max")]
    max_results: usize,
    #[serde(default = "default_context_lines")]
    context_lines: usize,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn relative_name(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => display(rel),
        Err(_) => display(path),
    }
}

/// Read a file as text, replacing invalid UTF-8.
fn read_lossy(path: &Path) -> ToolResult<String> {
    let bytes = fs::read(path).map_err(|e| ToolError::io(display(path), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn list_directory(args: ListDirectoryArgs) -> ToolResult<Value> {
    let root = expand_path(&args.path);
    let depth = args.depth.max(1);
    let mut items = Vec::new();

    // The root must be readable; nested failures are reported inline
    fs::read_dir(&root).map_err(|e| ToolError::io(display(&root), e))?;
    scan_dir(&root, &root, 1, depth, &mut items);

    Ok(json!({ "success": true, "path": display(&root), "items": items }))
}

fn scan_dir(dir: &Path, root: &Path, current: usize, max_depth: usize, items: &mut Vec<Value>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            items.push(json!({ "name": relative_name(dir, root), "denied": true }));
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths.into_iter().take(MAX_ENTRIES_PER_DIR) {
        let is_dir = path.is_dir();
        let size = if is_dir {
            0
        } else {
            fs::metadata(&path).map(|m| m.len()).unwrap_or(0)
        };
        items.push(json!({ "name": relative_name(&path, root), "is_dir": is_dir, "size": size }));

        if is_dir && current < max_depth {
            scan_dir(&path, root, current + 1, max_depth, items);
        }
    }
}

fn read_file(args: ReadFileArgs) -> ToolResult<Value> {
    let path = expand_path(&args.path);
    let text = read_lossy(&path)?;
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let total = lines.len();

    let window: &[&str] = if let Some(head) = args.head {
        &lines[..head.min(total)]
    } else if let Some(tail) = args.tail {
        &lines[total.saturating_sub(tail)..]
    } else if args.offset < 0 {
        let back = usize::try_from(args.offset.unsigned_abs()).unwrap_or(usize::MAX);
        &lines[total.saturating_sub(back)..]
    } else {
        let start = usize::try_from(args.offset).unwrap_or(usize::MAX).min(total);
        let end = start.saturating_add(args.length).min(total);
        &lines[start..end]
    };

    Ok(json!({
        "success": true,
        "path": display(&path),
        "content": window.concat(),
        "total_lines": total,
        "returned_lines": window.len(),
    }))
}

fn read_multiple_files(args: ReadMultipleArgs) -> Value {
    let results: Vec<Value> = args
        .paths
        .iter()
        .map(|p| match read_lossy(&expand_path(p)) {
            Ok(content) => json!({
                "path": p,
                "success": true,
                "content": truncate_chars(&content, MULTI_READ_MAX_CHARS),
            }),
            Err(e) => json!({ "path": p, "success": false, "error": e.to_string() }),
        })
        .collect();

    json!({ "success": true, "results": results })
}

fn write_file(args: WriteFileArgs) -> ToolResult<Value> {
    let append = match args.mode.as_str() {
        "rewrite" => false,
        "append" => true,
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "mode must be 'rewrite' or 'append', got '{}'",
                other
            )))
        }
    };

    let path = expand_path(&args.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ToolError::io(display(parent), e))?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(&path)
        .map_err(|e| ToolError::io(display(&path), e))?;
    file.write_all(args.content.as_bytes())
        .map_err(|e| ToolError::io(display(&path), e))?;

    let content = &args.content;
    let lines_written =
        content.matches('\n').count() + usize::from(!content.is_empty() && !content.ends_with('\n'));

    Ok(json!({
        "success": true,
        "path": display(&path),
        "lines_written": lines_written,
        "mode": args.mode,
    }))
}

fn edit_block(args: EditBlockArgs) -> ToolResult<Value> {
    if args.old_string.is_empty() {
        return Err(ToolError::InvalidArguments("old_string must not be empty".into()));
    }

    let path = expand_path(&args.file_path);
    let content = read_lossy(&path)?;

    let count = content.matches(args.old_string.as_str()).count();
    if count == 0 {
        return Err(ToolError::Failed(format!(
            "'{}...' not found in file",
            truncate_chars(&args.old_string, 50)
        )));
    }
    if count != args.expected_replacements {
        return Err(ToolError::Failed(format!(
            "Expected {} occurrences, found {}",
            args.expected_replacements, count
        )));
    }

    let updated = content.replace(args.old_string.as_str(), &args.new_string);
    fs::write(&path, updated).map_err(|e| ToolError::io(display(&path), e))?;

    Ok(json!({ "success": true, "path": display(&path), "replacements": count }))
}

fn create_directory(args: PathArgs) -> ToolResult<Value> {
    let path = expand_path(&args.path);
    fs::create_dir_all(&path).map_err(|e| ToolError::io(display(&path), e))?;
    Ok(json!({ "success": true, "path": display(&path) }))
}

/// Moving onto an existing directory places the source inside it.
fn resolve_destination(src: &Path, dest: PathBuf) -> PathBuf {
    match src.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest,
    }
}

fn move_path(args: TransferArgs) -> ToolResult<Value> {
    let src = expand_path(&args.source);
    let dest = resolve_destination(&src, expand_path(&args.destination));

    if let Err(rename_err) = fs::rename(&src, &dest) {
        // Cross-device moves fall back to copy and delete
        if !src.exists() {
            return Err(ToolError::io(display(&src), rename_err));
        }
        debug!("rename {} failed ({}), copying instead", src.display(), rename_err);
        if src.is_dir() {
            copy_tree(&src, &dest)?;
            fs::remove_dir_all(&src).map_err(|e| ToolError::io(display(&src), e))?;
        } else {
            fs::copy(&src, &dest).map_err(|e| ToolError::io(display(&dest), e))?;
            fs::remove_file(&src).map_err(|e| ToolError::io(display(&src), e))?;
        }
    }

    Ok(json!({ "success": true, "source": display(&src), "destination": display(&dest) }))
}

fn copy_path(args: TransferArgs) -> ToolResult<Value> {
    let src = expand_path(&args.source);
    let dest = expand_path(&args.destination);

    let meta = fs::metadata(&src).map_err(|e| ToolError::io(display(&src), e))?;
    let dest = if meta.is_file() {
        let dest = resolve_destination(&src, dest);
        fs::copy(&src, &dest).map_err(|e| ToolError::io(display(&dest), e))?;
        dest
    } else {
        if dest.exists() {
            return Err(ToolError::Failed(format!("{} already exists", display(&dest))));
        }
        copy_tree(&src, &dest)?;
        dest
    };

    Ok(json!({ "success": true, "source": display(&src), "destination": display(&dest) }))
}

fn copy_tree(src: &Path, dest: &Path) -> ToolResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| ToolError::Failed(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| ToolError::io(display(&target), e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| ToolError::io(display(&target), e))?;
        }
    }
    Ok(())
}

fn delete_path(args: PathArgs) -> ToolResult<Value> {
    let path = expand_path(&args.path);

    // symlink_metadata so a link to a directory removes the link, not the target
    let existed = match fs::symlink_metadata(&path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(&path).map_err(|e| ToolError::io(display(&path), e))?;
            true
        }
        Ok(_) => {
            fs::remove_file(&path).map_err(|e| ToolError::io(display(&path), e))?;
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(ToolError::io(display(&path), e)),
    };

    Ok(json!({ "success": true, "deleted": display(&path), "existed": existed }))
}

fn search_files(args: SearchFilesArgs) -> ToolResult<Value> {
    let root = expand_path(&args.path);
    if !root.is_dir() {
        return Err(ToolError::NotFound(display(&root)));
    }

    let needle = args.pattern.to_lowercase();
    let include_hidden = args.include_hidden;
    let mut results = Vec::new();
    let mut truncated = false;

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || include_hidden || !is_hidden(e));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_name().to_string_lossy().to_lowercase().contains(&needle) {
            continue;
        }
        if results.len() >= args.max_results {
            truncated = true;
            break;
        }

        let is_dir = entry.file_type().is_dir();
        let size = if is_dir {
            0
        } else {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        };
        results.push(json!({ "path": display(entry.path()), "is_dir": is_dir, "size": size }));
    }

    Ok(json!({
        "success": true,
        "count": results.len(),
        "truncated": truncated,
        "results": results,
    }))
}

fn search_content(args: SearchContentArgs) -> ToolResult<Value> {
    let root = expand_path(&args.path);
    if !root.exists() {
        return Err(ToolError::NotFound(display(&root)));
    }

    let file_pattern = Pattern::new(&args.file_pattern)
        .map_err(|e| ToolError::InvalidArguments(format!("file_pattern: {}", e)))?;
    let needle = args.pattern.to_lowercase();
    let mut results = Vec::new();
    let mut truncated = false;

    let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || !(is_hidden(e) || e.file_name() == "node_modules")
    });

    'files: for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file()
            || !file_pattern.matches(&entry.file_name().to_string_lossy())
        {
            continue;
        }
        let Ok(text) = read_lossy(entry.path()) else {
            continue;
        };

        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        for (i, line) in lines.iter().enumerate() {
            if !line.to_lowercase().contains(&needle) {
                continue;
            }
            if results.len() >= args.max_results {
                truncated = true;
                break 'files;
            }

            let start = i.saturating_sub(args.context_lines);
            let end = (i + args.context_lines + 1).min(lines.len());
            results.push(json!({
                "file": display(entry.path()),
                "line": i + 1,
                "context": lines[start..end].concat().trim(),
            }));
        }
    }

    Ok(json!({
        "success": true,
        "count": results.len(),
        "truncated": truncated,
        "results": results,
    }))
}

fn timestamp(time: std::io::Result<SystemTime>) -> Value {
    match time {
        Ok(t) => Value::String(DateTime::<Local>::from(t).to_rfc3339()),
        Err(_) => Value::Null,
    }
}

fn get_file_info(args: PathArgs) -> ToolResult<Value> {
    let path = expand_path(&args.path);
    let meta = match fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(json!({ "success": true, "exists": false, "path": display(&path) }))
        }
        Err(e) => return Err(ToolError::io(display(&path), e)),
    };

    let mut info = json!({
        "success": true,
        "exists": true,
        "path": display(&path),
        "is_file": meta.is_file(),
        "is_dir": meta.is_dir(),
        "size": meta.len(),
        "created": timestamp(meta.created()),
        "modified": timestamp(meta.modified()),
        "accessed": timestamp(meta.accessed()),
    });

    if meta.is_file() {
        if let Ok(text) = read_lossy(&path) {
            info["line_count"] = json!(text.lines().count());
        }
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn call(name: &str, args: Value) -> ToolResult<Value> {
        FilesystemTools::new().call(name, args).await
    }

    fn p(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).display().to_string()
    }

    #[tokio::test]
    async fn test_write_then_read_window() {
        let dir = TempDir::new().unwrap();
        let file = p(&dir, "nested/notes.txt");

        let written = call("write_file", json!({ "path": file, "content": "a\nb\nc\nd" }))
            .await
            .unwrap();
        assert_eq!(written["lines_written"], 4);

        let read = call("read_file", json!({ "path": file, "offset": 1, "length": 2 }))
            .await
            .unwrap();
        assert_eq!(read["content"], "b\nc\n");
        assert_eq!(read["total_lines"], 4);
        assert_eq!(read["returned_lines"], 2);

        let tail = call("read_file", json!({ "path": file, "offset": -1 })).await.unwrap();
        assert_eq!(tail["content"], "d");

        let head = call("read_file", json!({ "path": file, "head": 1 })).await.unwrap();
        assert_eq!(head["content"], "a\n");
    }

    #[tokio::test]
    async fn test_append_mode() {
        let dir = TempDir::new().unwrap();
        let file = p(&dir, "log.txt");

        call("write_file", json!({ "path": file, "content": "one\n" })).await.unwrap();
        call("write_file", json!({ "path": file, "content": "two\n", "mode": "append" }))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("log.txt")).unwrap(), "one\ntwo\n");

        let err = call("write_file", json!({ "path": file, "content": "", "mode": "bogus" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_arguments");
    }

    #[tokio::test]
    async fn test_edit_block_counts_occurrences() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("code.rs");
        fs::write(&file, "let x = 1;\nlet y = 1;\n").unwrap();
        let path = file.display().to_string();

        let err = call(
            "edit_block",
            json!({ "file_path": path, "old_string": "= 1", "new_string": "= 2" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Expected 1 occurrences, found 2");

        let ok = call(
            "edit_block",
            json!({ "file_path": path, "old_string": "= 1", "new_string": "= 2", "expected_replacements": 2 }),
        )
        .await
        .unwrap();
        assert_eq!(ok["replacements"], 2);
        assert_eq!(fs::read_to_string(&file).unwrap(), "let x = 2;\nlet y = 2;\n");

        let missing = call("edit_block", json!({ "file_path": path, "old_string": "zzz" }))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_list_directory_depth() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("top.txt"), "hi").unwrap();
        fs::write(dir.path().join("sub/inner.txt"), "x").unwrap();

        let shallow = call("list_directory", json!({ "path": dir.path().display().to_string() }))
            .await
            .unwrap();
        let names: Vec<&str> = shallow["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["sub", "top.txt"]);

        let deep = call(
            "list_directory",
            json!({ "path": dir.path().display().to_string(), "depth": 2 }),
        )
        .await
        .unwrap();
        let items = deep["items"].as_array().unwrap();
        assert!(items.iter().any(|i| i["name"] == Path::new("sub").join("inner.txt").display().to_string()));
        assert!(items.iter().any(|i| i["name"] == "top.txt" && i["size"] == 2));
    }

    #[tokio::test]
    async fn test_copy_move_delete() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/inner")).unwrap();
        fs::write(dir.path().join("src/inner/a.txt"), "a").unwrap();

        call("copy_file", json!({ "source": p(&dir, "src"), "destination": p(&dir, "copy") }))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("copy/inner/a.txt")).unwrap(), "a");

        call("move_file", json!({ "source": p(&dir, "copy"), "destination": p(&dir, "moved") }))
            .await
            .unwrap();
        assert!(!dir.path().join("copy").exists());
        assert!(dir.path().join("moved/inner/a.txt").exists());

        let first = call("delete_path", json!({ "path": p(&dir, "moved") })).await.unwrap();
        assert_eq!(first["existed"], true);
        assert!(!dir.path().join("moved").exists());
        // Deleting again is not an error
        let again = call("delete_path", json!({ "path": p(&dir, "moved") })).await.unwrap();
        assert_eq!(again["existed"], false);
    }

    #[tokio::test]
    async fn test_search_files_skips_hidden_and_caps() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/report.txt"), "").unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(format!("Report{}.md", i)), "").unwrap();
        }

        let found = call(
            "search_files",
            json!({ "path": dir.path().display().to_string(), "pattern": "report" }),
        )
        .await
        .unwrap();
        assert_eq!(found["count"], 3);
        assert_eq!(found["truncated"], false);

        let capped = call(
            "search_files",
            json!({ "path": dir.path().display().to_string(), "pattern": "report", "max_results": 2 }),
        )
        .await
        .unwrap();
        assert_eq!(capped["count"], 2);
        assert_eq!(capped["truncated"], true);
    }

    #[tokio::test]
    async fn test_search_content_with_context() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "one\ntwo\nNEEDLE here\nfour\n").unwrap();
        fs::write(dir.path().join("b.txt"), "needle in txt\n").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/c.rs"), "needle\n").unwrap();

        let found = call(
            "search_content",
            json!({
                "path": dir.path().display().to_string(),
                "pattern": "needle",
                "file_pattern": "*.rs",
                "context_lines": 1
            }),
        )
        .await
        .unwrap();

        let results = found["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["line"], 3);
        assert_eq!(results[0]["context"], "two\nNEEDLE here\nfour");
    }

    #[tokio::test]
    async fn test_get_file_info() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "x\ny\n").unwrap();

        let info = call("get_file_info", json!({ "path": p(&dir, "f.txt") })).await.unwrap();
        assert_eq!(info["exists"], true);
        assert_eq!(info["is_file"], true);
        assert_eq!(info["size"], 4);
        assert_eq!(info["line_count"], 2);
        assert!(info["modified"].is_string());

        let missing = call("get_file_info", json!({ "path": p(&dir, "nope") })).await.unwrap();
        assert_eq!(missing["exists"], false);
    }

    #[tokio::test]
    async fn test_read_multiple_files_reports_each() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.txt"), "fine").unwrap();

        let out = call(
            "read_multiple_files",
            json!({ "paths": [p(&dir, "ok.txt"), p(&dir, "missing.txt")] }),
        )
        .await
        .unwrap();
        assert_eq!(out["results"][0]["content"], "fine");
        assert_eq!(out["results"][1]["success"], false);
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let err = call("read_file", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
