//! Rendering descriptors into output blocks
//!
//! A [`Render`] turns one [`ClassDescriptor`] into one [`OutputBlock`]. It
//! must be pure: the same descriptor always yields the same text, and no
//! state is shared between calls, so any lane may render any descriptor.
//!
//! Each generated file is `prologue`, then one block per descriptor in
//! whatever order the lanes finish, then `epilogue`. The epilogue is written
//! by the traversal's finalize step, after the last block.

use crate::descriptor::{is_identifier, ClassDescriptor};
use crate::error::TaskError;
use crate::parallel::OutputBlock;
use clap::ValueEnum;
use convert_case::{Case, Casing};
use std::fmt::Write as _;
use std::sync::Arc;

/// Banner at the top of every generated source file
pub const GENERATED_HEADER: &str = "// Generated by treegen. Do not edit.\n";

/// Indentation used by the class list
const LIST_INDENT: &str = "   ";

/// Pure per-descriptor renderer for one output file
pub trait Render: Send + Sync {
    /// Name of the generated file, relative to the output directory
    fn file_name(&self) -> String;

    /// Text written before any descriptor block
    fn prologue(&self, descriptors: &[ClassDescriptor]) -> OutputBlock;

    /// Render one descriptor
    fn render(&self, class: &ClassDescriptor) -> Result<OutputBlock, TaskError>;

    /// Text written after the last descriptor block
    fn epilogue(&self) -> OutputBlock {
        OutputBlock::default()
    }
}

/// Output flavors selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Flavor {
    /// Node structs, one per class
    Nodes,
    /// Depth-first visitor trait
    Visitor,
    /// Visitor that fans field visits out onto a worker pool
    ParallelVisitor,
    /// Plain-text class list
    ClassList,
}

impl Flavor {
    /// Flavors generated when none are requested
    pub const DEFAULT: &'static [Flavor] =
        &[Flavor::Nodes, Flavor::Visitor, Flavor::ParallelVisitor];

    /// Renderer for this flavor
    ///
    /// `visitor_name` names the generated parallel visitor type.
    pub fn renderer(self, visitor_name: &str) -> Arc<dyn Render> {
        match self {
            Flavor::Nodes => Arc::new(NodeRenderer),
            Flavor::Visitor => Arc::new(VisitorTraitRenderer),
            Flavor::ParallelVisitor => Arc::new(ParallelVisitorRenderer::new(visitor_name)),
            Flavor::ClassList => Arc::new(ClassListRenderer),
        }
    }
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Flavor::Nodes => "nodes",
            Flavor::Visitor => "visitor",
            Flavor::ParallelVisitor => "parallel-visitor",
            Flavor::ClassList => "class-list",
        };
        f.write_str(s)
    }
}

/// Descriptors may be built in code without going through validation
fn check(class: &ClassDescriptor) -> Result<(), TaskError> {
    if !is_identifier(&class.name) {
        return Err(TaskError::Render {
            descriptor: class.name.clone(),
            reason: "class name is not an identifier".into(),
        });
    }
    if let Some(field) = class.fields.iter().find(|f| !is_identifier(&f.name)) {
        return Err(TaskError::Render {
            descriptor: class.name.clone(),
            reason: format!("field name '{}' is not an identifier", field.name),
        });
    }
    Ok(())
}

fn doc_comment(out: &mut String, indent: &str, class: &ClassDescriptor) {
    if class.doc.is_empty() {
        return;
    }
    for line in class.doc.lines() {
        if line.is_empty() {
            let _ = writeln!(out, "{}///", indent);
        } else {
            let _ = writeln!(out, "{}/// {}", indent, line);
        }
    }
}

/// `nodes.rs`: one struct per class
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRenderer;

impl Render for NodeRenderer {
    fn file_name(&self) -> String {
        "nodes.rs".into()
    }

    fn prologue(&self, descriptors: &[ClassDescriptor]) -> OutputBlock {
        let mut out = String::from(GENERATED_HEADER);
        let _ = writeln!(out, "//! Syntax tree nodes ({} classes)", descriptors.len());
        out.push_str("\nuse std::sync::Arc;\n\n");
        OutputBlock::from(out)
    }

    fn render(&self, class: &ClassDescriptor) -> Result<OutputBlock, TaskError> {
        check(class)?;
        let mut out = String::new();

        doc_comment(&mut out, "", class);
        let _ = writeln!(out, "#[derive(Debug, Clone)]");
        if class.fields.is_empty() {
            let _ = writeln!(out, "pub struct {};\n", class.name);
            return Ok(out.into());
        }

        let _ = writeln!(out, "pub struct {} {{", class.name);
        for f in &class.fields {
            let _ = writeln!(out, "    pub {}: Arc<{}>,", f.name, f.ty);
        }
        out.push_str("}\n\n");

        let params: Vec<String> = class
            .fields
            .iter()
            .map(|f| format!("{}: Arc<{}>", f.name, f.ty))
            .collect();
        let names: Vec<&str> = class.fields.iter().map(|f| f.name.as_str()).collect();

        let _ = writeln!(out, "impl {} {{", class.name);
        let _ = writeln!(out, "    pub fn new({}) -> Self {{", params.join(", "));
        let _ = writeln!(out, "        Self {{ {} }}", names.join(", "));
        out.push_str("    }\n}\n\n");
        Ok(out.into())
    }
}

/// `visitor.rs`: sequential depth-first visitor trait
#[derive(Debug, Clone, Copy, Default)]
pub struct VisitorTraitRenderer;

impl Render for VisitorTraitRenderer {
    fn file_name(&self) -> String {
        "visitor.rs".into()
    }

    fn prologue(&self, _descriptors: &[ClassDescriptor]) -> OutputBlock {
        let mut out = String::from(GENERATED_HEADER);
        out.push_str("\nuse super::nodes::*;\n\n");
        out.push_str("/// Depth-first visitor, one method per node class\n");
        out.push_str("pub trait Visitor {\n");
        OutputBlock::from(out)
    }

    fn render(&self, class: &ClassDescriptor) -> Result<OutputBlock, TaskError> {
        check(class)?;
        let mut out = String::new();

        doc_comment(&mut out, "    ", class);
        let _ = writeln!(
            out,
            "    fn visit_{}(&mut self, _n: &{}) {{}}\n",
            class.snake_name(),
            class.name
        );
        Ok(out.into())
    }

    fn epilogue(&self) -> OutputBlock {
        "}\n".into()
    }
}

/// Parallel visitor: each field visit becomes a pool task
///
/// Every class gets its own `impl` block with a `visit_*` method and an
/// `impl ParallelAccept` that dispatches back into it. Field types must
/// themselves be node classes (or implement `ParallelAccept` by hand).
#[derive(Debug, Clone)]
pub struct ParallelVisitorRenderer {
    type_name: String,
}

impl ParallelVisitorRenderer {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl Render for ParallelVisitorRenderer {
    fn file_name(&self) -> String {
        format!("{}.rs", self.type_name.to_case(Case::Snake))
    }

    fn prologue(&self, _descriptors: &[ClassDescriptor]) -> OutputBlock {
        let name = &self.type_name;
        let mut out = String::from(GENERATED_HEADER);
        out.push_str(
            "\nuse super::nodes::*;\n\
             use std::sync::Arc;\n\
             use treegen::error::{GenError, GroupError, PoolError, TaskError, TaskResult};\n\
             use treegen::parallel::TaskScope;\n\
             use treegen::visitor::ParallelVisitor as Runtime;\n\n",
        );
        let _ = write!(
            out,
            "\
/// Node types {name} can descend into
pub trait ParallelAccept: Send + Sync + 'static {{
    fn accept(self: Arc<Self>, v: &{name}) -> Result<(), PoolError>;
}}

/// Visits node fields concurrently on a fixed set of lanes
#[derive(Clone)]
pub struct {name} {{
    runtime: Arc<Runtime>,
}}

impl {name} {{
    /// One lane per hardware thread
    pub fn new() -> Result<Self, PoolError> {{
        Ok(Self {{ runtime: Arc::new(Runtime::new()?) }})
    }}

    pub fn with_lanes(lanes: usize) -> Result<Self, PoolError> {{
        Ok(Self {{ runtime: Arc::new(Runtime::with_lanes(lanes)?) }})
    }}

    pub fn add_task<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: FnOnce(&TaskScope) -> TaskResult + Send + 'static,
    {{
        self.runtime.add_task(work)
    }}

    pub fn task_end(&self) -> Result<(), GroupError> {{
        self.runtime.task_end()
    }}

    pub fn is_terminated(&self) -> bool {{
        self.runtime.is_terminated()
    }}

    pub fn await_termination(&self) -> Result<(), GroupError> {{
        self.runtime.await_termination()
    }}

    /// Wait for the last task, then release the lanes
    pub fn shutdown(self) -> Result<(), GenError> {{
        match Arc::try_unwrap(self.runtime) {{
            Ok(runtime) => runtime.shutdown().map(|_| ()),
            Err(shared) => Ok(shared.await_termination()?),
        }}
    }}

    /// Visit `root` and everything below it, then wait for the last task
    pub fn visit_all<N: ParallelAccept>(&self, root: Arc<N>) -> Result<(), GenError> {{
        root.accept(self)?;
        self.await_termination()?;
        Ok(())
    }}

    fn descend<T: ParallelAccept>(&self, child: &Arc<T>) -> TaskResult {{
        Arc::clone(child)
            .accept(self)
            .map_err(|e| TaskError::Visit {{ reason: e.to_string() }})
    }}
}}

"
        );
        OutputBlock::from(out)
    }

    fn render(&self, class: &ClassDescriptor) -> Result<OutputBlock, TaskError> {
        check(class)?;
        let name = &self.type_name;
        let snake = class.snake_name();
        let param = if class.fields.is_empty() { "_n" } else { "n" };
        let mut out = String::new();

        let _ = writeln!(out, "impl {} {{", name);
        doc_comment(&mut out, "    ", class);
        let _ = writeln!(
            out,
            "    pub fn visit_{}(&self, {}: &Arc<{}>) -> Result<(), PoolError> {{",
            snake, param, class.name
        );
        for f in &class.fields {
            out.push_str("        let (v, node) = (self.clone(), Arc::clone(n));\n");
            let _ = writeln!(
                out,
                "        self.add_task(move |_| v.descend(&node.{}))?;",
                f.name
            );
        }
        out.push_str("        Ok(())\n    }\n}\n\n");

        // dispatch from the node back into its visit method
        let _ = writeln!(out, "impl ParallelAccept for {} {{", class.name);
        let _ = writeln!(
            out,
            "    fn accept(self: Arc<Self>, v: &{}) -> Result<(), PoolError> {{",
            name
        );
        let _ = writeln!(out, "        v.visit_{}(&self)", snake);
        out.push_str("    }\n}\n\n");
        Ok(out.into())
    }
}

/// `classes.txt`: each class followed by its indented fields
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassListRenderer;

impl Render for ClassListRenderer {
    fn file_name(&self) -> String {
        "classes.txt".into()
    }

    fn prologue(&self, _descriptors: &[ClassDescriptor]) -> OutputBlock {
        OutputBlock::default()
    }

    fn render(&self, class: &ClassDescriptor) -> Result<OutputBlock, TaskError> {
        let mut out = String::new();
        let _ = writeln!(out, "class {}:", class.name);
        for f in &class.fields {
            let _ = writeln!(out, "{}{} {}", LIST_INDENT, f.ty, f.name);
        }
        out.push('\n');
        Ok(out.into())
    }
}
