use super::*;

/// Where the bytes of a sampled allocation are attributed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
  Interpreter,
  Native,
}

/// Outcome of inspecting a single frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameVerdict {
  /// The frame says nothing; look at the next caller.
  Continue,
  Interpreter,
  Native,
}

/// Naming conventions that identify the embedded interpreter's frames.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ClassifierRules {
  /// Libraries that export functions under the public prefix without being
  /// part of the interpreter.
  pub false_positive: &'static str,
  /// Substring carried by the interpreter's internal functions.
  pub internal_marker: &'static str,
  /// Shorter names are never treated as interpreter API calls.
  pub min_name_len: usize,
  /// Internal frames that hand control to extension (native) code.
  pub native_marker: &'static str,
  /// Prefix of the interpreter's public C API.
  pub public_prefix: &'static str,
}

impl ClassifierRules {
  /// CPython's conventions: `Py*` public API, `_Py*` internals, NumPy's
  /// `PyArray_*` exports as the known impostor and `_PyCFunction*` as the
  /// trampoline into C extensions.
  pub const CPYTHON: Self = Self {
    false_positive: "PyArray_",
    internal_marker: "_Py",
    min_name_len: "PySet_New".len(),
    native_marker: "_PyCFunction",
    public_prefix: "Py",
  };

  /// Apply the precedence table to one resolved symbol name.
  #[must_use]
  pub fn judge(&self, name: &[u8]) -> FrameVerdict {
    if name.len() < self.min_name_len {
      return FrameVerdict::Continue;
    }

    if name.starts_with(self.public_prefix.as_bytes()) {
      if contains(name, self.false_positive.as_bytes()) {
        return FrameVerdict::Native;
      }

      return FrameVerdict::Interpreter;
    }

    if !contains(name, self.internal_marker.as_bytes()) {
      return FrameVerdict::Continue;
    }

    if contains(name, self.native_marker.as_bytes()) {
      return FrameVerdict::Native;
    }

    FrameVerdict::Interpreter
  }
}

impl Default for ClassifierRules {
  fn default() -> Self {
    Self::CPYTHON
  }
}

/// Attributes an allocation to interpreter or native code by walking a few
/// caller frames.
#[derive(Debug)]
pub struct Classifier<S> {
  cache: SymbolCache,
  max_frames: usize,
  rules: ClassifierRules,
  stack: S,
}

impl<S: StackInspector> Classifier<S> {
  #[must_use]
  pub fn cache(&self) -> &SymbolCache {
    &self.cache
  }

  /// Capture the current stack and classify it.
  #[must_use]
  pub fn classify(&self) -> Origin {
    let mut frames = [0usize; MAX_FRAMES_LIMIT];
    let captured = self.stack.capture(&mut frames[..self.max_frames]);
    self.classify_frames(&frames[..captured.min(self.max_frames)])
  }

  /// Classify an already captured stack, nearest caller first.
  ///
  /// The first frame that yields a verdict decides; a stack with no
  /// deciding frame is native.
  #[must_use]
  pub fn classify_frames(&self, frames: &[usize]) -> Origin {
    for address in frames.iter().take(self.max_frames) {
      let Some(name) = self.symbol_name(*address) else {
        continue;
      };

      match self.rules.judge(name.to_bytes()) {
        FrameVerdict::Continue => {}
        FrameVerdict::Interpreter => return Origin::Interpreter,
        FrameVerdict::Native => return Origin::Native,
      }
    }

    Origin::Native
  }

  #[must_use]
  pub fn new(
    stack: S,
    rules: ClassifierRules,
    max_frames: usize,
    cache_slots: usize,
  ) -> Self {
    Self {
      cache: SymbolCache::new(cache_slots),
      max_frames: max_frames.clamp(1, MAX_FRAMES_LIMIT),
      rules,
      stack,
    }
  }

  #[must_use]
  pub fn rules(&self) -> &ClassifierRules {
    &self.rules
  }

  #[must_use]
  pub fn stack(&self) -> &S {
    &self.stack
  }

  fn symbol_name(&self, address: usize) -> Option<&'static CStr> {
    if let Some(name) = self.cache.get(address) {
      return Some(name);
    }

    let name = self.stack.resolve(address)?;
    self.cache.put(address, name);
    Some(name)
  }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
  needle.is_empty()
    || haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
  use {super::*, crate::testing::SyntheticStack};

  fn classifier(stack: SyntheticStack) -> Classifier<SyntheticStack> {
    Classifier::new(stack, ClassifierRules::CPYTHON, 4, 64)
  }

  #[test]
  fn judges_names_by_precedence() {
    let rules = ClassifierRules::CPYTHON;

    assert_eq!(rules.judge(b"PyList_Append"), FrameVerdict::Interpreter);
    assert_eq!(rules.judge(b"PyArray_NewFromDescr"), FrameVerdict::Native);
    assert_eq!(rules.judge(b"_PyObject_Malloc"), FrameVerdict::Interpreter);
    assert_eq!(
      rules.judge(b"_PyCFunction_FastCallDict"),
      FrameVerdict::Native
    );
    assert_eq!(rules.judge(b"std_vector_push"), FrameVerdict::Continue);
    assert_eq!(rules.judge(b"Py_New"), FrameVerdict::Continue);
  }

  #[test]
  fn public_prefix_with_false_positive_is_native() {
    let stack = SyntheticStack::new([
      (0x10, Some(c"PyArray_Zeros")),
      (0x20, Some(c"PyList_Append")),
    ]);

    assert_eq!(classifier(stack).classify(), Origin::Native);
  }

  #[test]
  fn internal_frame_without_marker_is_interpreter() {
    let stack = SyntheticStack::new([
      (0x10, Some(c"memcpy_avx_unaligned")),
      (0x20, Some(c"_PyObject_GC_Alloc")),
    ]);

    assert_eq!(classifier(stack).classify(), Origin::Interpreter);
  }

  #[test]
  fn extension_trampoline_is_native() {
    let stack = SyntheticStack::new([
      (0x10, Some(c"my_extension_alloc")),
      (0x20, Some(c"_PyCFunction_Vectorcall")),
      (0x30, Some(c"PyEval_EvalFrame")),
    ]);

    assert_eq!(classifier(stack).classify(), Origin::Native);
  }

  #[test]
  fn unresolved_and_short_frames_are_skipped() {
    let stack = SyntheticStack::new([
      (0x10, None),
      (0x20, Some(c"f")),
      (0x30, Some(c"PyUnicode_FromString")),
    ]);

    assert_eq!(classifier(stack).classify(), Origin::Interpreter);
  }

  #[test]
  fn stack_without_deciding_frame_is_native() {
    let stack = SyntheticStack::new([
      (0x10, None),
      (0x20, Some(c"operator_new")),
      (0x30, Some(c"do_some_work_here")),
      (0x40, Some(c"another_native_fn")),
    ]);

    assert_eq!(classifier(stack).classify(), Origin::Native);
  }

  #[test]
  fn frames_beyond_limit_are_ignored() {
    let stack = SyntheticStack::new([
      (0x10, Some(c"native_frame_one")),
      (0x20, Some(c"native_frame_two")),
      (0x30, Some(c"native_frame_three")),
      (0x40, Some(c"native_frame_four")),
      (0x50, Some(c"PyDict_SetItem")),
    ]);

    assert_eq!(classifier(stack).classify(), Origin::Native);
  }

  #[test]
  fn empty_stack_is_native() {
    let stack = SyntheticStack::new([]);
    assert_eq!(classifier(stack).classify(), Origin::Native);
  }

  #[test]
  fn resolved_names_are_cached() {
    let stack = SyntheticStack::new([
      (0x10, Some(c"helper_function")),
      (0x20, Some(c"PyTuple_New_impl")),
    ]);
    let classifier = classifier(stack);

    assert_eq!(classifier.classify(), Origin::Interpreter);
    assert_eq!(classifier.classify(), Origin::Interpreter);

    assert_eq!(classifier.stack().resolutions(), 2);
    assert_eq!(classifier.cache().len(), 2);
    assert_eq!(classifier.cache().get(0x20), Some(c"PyTuple_New_impl"));
  }
}
