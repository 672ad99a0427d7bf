//! Directory builder
//!
//! Finds the files a request should be compiled together with and splits
//! them into groups, one assembly each.
//!
//! Discovery starts in the requested file's directory and follows markup
//! dependencies into other directories. Grouping puts a provider into the
//! first open group of the same directory and language that has no
//! dependency path to or from it and that would not close a cycle between
//! groups. Providers are placed dependencies first, so a provider starting
//! a group of its own can never close a cycle. Groups come out in build
//! order, the groups others depend on first, standalone groups last.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use aspx_compiler::VirtualPath;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::cache::cache_key;
use crate::compiler::CompilerType;
use crate::config::ProviderKind;
use crate::diagnostics::BuildError;
use crate::providers::{
    is_resource_file, try_parse_culture_suffix, BuildContext, BuildProvider, ProviderRegistry,
    ThemeBuildProvider,
};

/// Providers compiled into one assembly.
pub struct BuildProviderGroup {
    pub name_prefix: String,
    /// Exactly one member that never shares an assembly.
    pub standalone: bool,
    /// Holds the application file.
    pub application: bool,
    /// Holds the originally requested path.
    pub master: bool,
    pub compiler_type: Option<CompilerType>,
    pub directory: VirtualPath,
    pub providers: Vec<Box<dyn BuildProvider>>,
}

impl BuildProviderGroup {
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn contains(&self, path: &VirtualPath) -> bool {
        let key = cache_key(path);
        self.providers
            .iter()
            .any(|p| cache_key(p.virtual_path()) == key)
    }

    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            name_prefix: self.name_prefix.clone(),
            standalone: self.standalone,
            application: self.application,
            master: self.master,
            language: self.compiler_type.as_ref().map(|c| c.language.clone()),
            members: self
                .providers
                .iter()
                .map(|p| p.virtual_path().as_str().to_string())
                .collect(),
        }
    }
}

impl fmt::Debug for BuildProviderGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildProviderGroup")
            .field("name_prefix", &self.name_prefix)
            .field("standalone", &self.standalone)
            .field("application", &self.application)
            .field("master", &self.master)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Printable view of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub name_prefix: String,
    pub standalone: bool,
    pub application: bool,
    pub master: bool,
    pub language: Option<String>,
    pub members: Vec<String>,
}

pub struct DirectoryBuilder<'a, 'c> {
    ctx: &'a BuildContext<'c>,
    extensions: &'a ProviderRegistry,
}

impl<'a, 'c> DirectoryBuilder<'a, 'c> {
    pub fn new(ctx: &'a BuildContext<'c>, extensions: &'a ProviderRegistry) -> Self {
        DirectoryBuilder { ctx, extensions }
    }

    /// Discover and group the providers to build for `requested`.
    ///
    /// In single mode only the requested file is built. `skip` filters out
    /// paths that need no build (already cached or being built).
    pub fn build(
        &self,
        requested: &VirtualPath,
        single: bool,
        skip: &dyn Fn(&VirtualPath) -> bool,
    ) -> Result<Vec<BuildProviderGroup>, BuildError> {
        if let Some(theme) = self.ctx.config.theme_directory(requested) {
            let provider = ThemeBuildProvider::open(self.ctx, &theme)?;
            let name = theme.file_name().to_string();
            return Ok(vec![BuildProviderGroup {
                name_prefix: format!("App_Theme_{}", name),
                standalone: true,
                application: false,
                master: true,
                compiler_type: None,
                directory: theme.clone(),
                providers: vec![Box::new(provider)],
            }]);
        }

        let first = self.extensions.create(self.ctx, requested)?;
        let single = single || first.kind() == ProviderKind::Application;
        let providers = if single {
            vec![first]
        } else {
            self.discover(first, skip)
        };
        self.group(requested, providers)
    }

    /// Providers for the requested file's directory and every directory a
    /// discovered provider depends on. Files that fail to parse are left
    /// out; they fail again when requested themselves.
    fn discover(
        &self,
        first: Box<dyn BuildProvider>,
        skip: &dyn Fn(&VirtualPath) -> bool,
    ) -> Vec<Box<dyn BuildProvider>> {
        let config = self.ctx.config;
        let mut discovered: IndexMap<String, Box<dyn BuildProvider>> = IndexMap::new();
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();

        let dir = first.virtual_path().directory();
        visited.insert(cache_key(&dir));
        queue.push_back(dir);
        discovered.insert(cache_key(first.virtual_path()), first);

        while let Some(dir) = queue.pop_front() {
            let entries = match self.ctx.provider.list_directory(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(directory = %dir, error = %err, "cannot list directory");
                    continue;
                }
            };
            for entry in entries.iter().filter(|e| !e.is_directory) {
                let path = match dir.combine(&entry.name) {
                    Some(path) => path,
                    None => continue,
                };
                let key = cache_key(&path);
                if discovered.contains_key(&key) || config.is_ignored(&path) || skip(&path) {
                    continue;
                }
                if is_resource_file(&path) {
                    debug!(
                        path = %path,
                        culture = try_parse_culture_suffix(path.file_name()).unwrap_or("neutral"),
                        "skipping resource file"
                    );
                    continue;
                }
                match self.extensions.kind_for(&path) {
                    None | Some(ProviderKind::Application) | Some(ProviderKind::Theme) => continue,
                    Some(_) => {}
                }
                match self.extensions.create(self.ctx, &path) {
                    Ok(provider) => {
                        discovered.insert(key, provider);
                    }
                    Err(err) => {
                        warn!(path = %path, error = %err, "leaving file out of the batch");
                    }
                }
            }

            for provider in discovered.values() {
                for dependency in provider.dependencies() {
                    if self.extensions.kind_for(dependency).is_none()
                        || skip(dependency)
                        || config.is_ignored(dependency)
                    {
                        continue;
                    }
                    let dir = dependency.directory();
                    if visited.insert(cache_key(&dir)) {
                        queue.push_back(dir);
                    }
                }
            }
        }

        debug!(count = discovered.len(), "discovered build providers");
        discovered.into_values().collect()
    }

    fn group(
        &self,
        requested: &VirtualPath,
        providers: Vec<Box<dyn BuildProvider>>,
    ) -> Result<Vec<BuildProviderGroup>, BuildError> {
        let requested_key = cache_key(requested);
        let index: HashMap<String, usize> = providers
            .iter()
            .enumerate()
            .map(|(i, p)| (cache_key(p.virtual_path()), i))
            .collect();
        let deps: Vec<Vec<usize>> = providers
            .iter()
            .map(|p| {
                p.dependencies()
                    .iter()
                    .filter_map(|d| index.get(&cache_key(d)).copied())
                    .collect()
            })
            .collect();

        let mut excluded = HashSet::new();
        while let Some(cycle) = first_cycle(&deps, &excluded) {
            let names: Vec<String> = cycle
                .iter()
                .map(|&i| providers[i].virtual_path().as_str().to_string())
                .collect();
            if cycle
                .iter()
                .any(|&i| cache_key(providers[i].virtual_path()) == requested_key)
            {
                return Err(BuildError::DependencyCycle {
                    virtual_path: requested.clone(),
                    path: names,
                });
            }
            warn!(cycle = %names.join(" -> "), "leaving circular dependencies out of the batch");
            excluded.extend(cycle);
        }

        let reach: Vec<HashSet<usize>> = (0..providers.len())
            .map(|i| {
                let mut seen = HashSet::new();
                collect_reachable(&deps, i, &mut seen);
                seen.remove(&i);
                seen
            })
            .collect();
        let order = dependency_order(&deps, &excluded);

        let mut plans: Vec<GroupPlan> = Vec::new();
        let mut group_of: Vec<Option<usize>> = vec![None; providers.len()];
        for &i in &order {
            let provider = &providers[i];
            let standalone = matches!(
                provider.kind(),
                ProviderKind::Application | ProviderKind::Theme
            );
            let directory = provider.virtual_path().directory();
            let compiler = provider.compiler_type();

            let joined = if standalone {
                None
            } else {
                (0..plans.len()).find(|&g| {
                    let plan = &plans[g];
                    !plan.standalone
                        && plan.members.len() < self.ctx.config.max_batch_size
                        && plan.directory == directory
                        && plan.compiler.as_ref() == compiler
                        && plan
                            .members
                            .iter()
                            .all(|&m| !reach[m].contains(&i) && !reach[i].contains(&m))
                        && !closes_group_cycle(&deps, &group_of, i, g)
                })
            };
            let g = match joined {
                Some(g) => g,
                None => {
                    plans.push(GroupPlan {
                        standalone,
                        application: provider.kind() == ProviderKind::Application,
                        directory,
                        compiler: compiler.cloned(),
                        members: Vec::new(),
                    });
                    plans.len() - 1
                }
            };
            plans[g].members.push(i);
            group_of[i] = Some(g);
        }

        let build_order = group_order(&plans, &deps, &group_of);

        let mut slots: Vec<Option<Box<dyn BuildProvider>>> = providers.into_iter().map(Some).collect();
        let mut groups = Vec::with_capacity(plans.len());
        for g in build_order {
            let plan = &plans[g];
            let members: Vec<Box<dyn BuildProvider>> = plan
                .members
                .iter()
                .filter_map(|&i| slots[i].take())
                .collect();
            let master = members
                .iter()
                .any(|p| cache_key(p.virtual_path()) == requested_key);
            let name_prefix = if plan.application {
                "App_global.asax".to_string()
            } else {
                format!(
                    "App_Web_{:08x}",
                    xxh3_64(format!("{}#{}", cache_key(&plan.directory), g).as_bytes()) as u32
                )
            };
            debug!(
                prefix = %name_prefix,
                members = members.len(),
                standalone = plan.standalone,
                "planned group"
            );
            groups.push(BuildProviderGroup {
                name_prefix,
                standalone: plan.standalone,
                application: plan.application,
                master,
                compiler_type: plan.compiler.clone(),
                directory: plan.directory.clone(),
                providers: members,
            });
        }
        Ok(groups)
    }
}

struct GroupPlan {
    standalone: bool,
    application: bool,
    directory: VirtualPath,
    compiler: Option<CompilerType>,
    members: Vec<usize>,
}

/// Mark everything reachable from `node`, `node` included.
fn collect_reachable(deps: &[Vec<usize>], node: usize, seen: &mut HashSet<usize>) {
    if !seen.insert(node) {
        return;
    }
    for &d in &deps[node] {
        collect_reachable(deps, d, seen);
    }
}

/// Depth-first search for a cycle through `node`. `stack` holds the current
/// path and `done` the nodes already proven cycle free.
fn find_cycle(
    deps: &[Vec<usize>],
    excluded: &HashSet<usize>,
    node: usize,
    stack: &mut Vec<usize>,
    done: &mut HashSet<usize>,
) -> Option<Vec<usize>> {
    if let Some(pos) = stack.iter().position(|&n| n == node) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(node);
        return Some(cycle);
    }
    if done.contains(&node) {
        return None;
    }
    stack.push(node);
    for &d in &deps[node] {
        if excluded.contains(&d) {
            continue;
        }
        if let Some(cycle) = find_cycle(deps, excluded, d, stack, done) {
            return Some(cycle);
        }
    }
    stack.pop();
    done.insert(node);
    None
}

/// First dependency cycle among the nodes not excluded, as a path that
/// starts and ends with the same node.
fn first_cycle(deps: &[Vec<usize>], excluded: &HashSet<usize>) -> Option<Vec<usize>> {
    let mut done = HashSet::new();
    (0..deps.len())
        .filter(|i| !excluded.contains(i))
        .find_map(|i| find_cycle(deps, excluded, i, &mut Vec::new(), &mut done))
}

/// Nodes with their dependencies first, otherwise in index order.
fn dependency_order(deps: &[Vec<usize>], excluded: &HashSet<usize>) -> Vec<usize> {
    fn visit(
        deps: &[Vec<usize>],
        excluded: &HashSet<usize>,
        node: usize,
        visited: &mut HashSet<usize>,
        out: &mut Vec<usize>,
    ) {
        if excluded.contains(&node) || !visited.insert(node) {
            return;
        }
        for &d in &deps[node] {
            visit(deps, excluded, d, visited, out);
        }
        out.push(node);
    }

    let mut visited = HashSet::new();
    let mut out = Vec::new();
    for i in 0..deps.len() {
        visit(deps, excluded, i, &mut visited, &mut out);
    }
    out
}

/// Edges between groups: `a -> b` when a member of `a` depends on a member
/// of `b`.
fn group_edges(
    deps: &[Vec<usize>],
    group_of: &[Option<usize>],
    groups: usize,
) -> Vec<HashSet<usize>> {
    let mut edges = vec![HashSet::new(); groups];
    for (node, node_deps) in deps.iter().enumerate() {
        let from = match group_of[node] {
            Some(g) => g,
            None => continue,
        };
        for &d in node_deps {
            if let Some(to) = group_of[d] {
                if to != from {
                    edges[from].insert(to);
                }
            }
        }
    }
    edges
}

fn group_reaches(
    edges: &[HashSet<usize>],
    from: usize,
    target: usize,
    visited: &mut HashSet<usize>,
) -> bool {
    if !visited.insert(from) {
        return false;
    }
    edges[from]
        .iter()
        .any(|&next| next == target || group_reaches(edges, next, target, visited))
}

/// Would putting `node` into group `g` make the group graph cyclic?
fn closes_group_cycle(
    deps: &[Vec<usize>],
    group_of: &[Option<usize>],
    node: usize,
    g: usize,
) -> bool {
    let mut tentative = group_of.to_vec();
    tentative[node] = Some(g);
    let groups = tentative.iter().flatten().max().map_or(0, |m| m + 1).max(g + 1);
    let edges = group_edges(deps, &tentative, groups);
    group_reaches(&edges, g, g, &mut HashSet::new())
}

/// Groups in build order: dependencies first, ties by creation, standalone
/// groups after all others.
fn group_order(plans: &[GroupPlan], deps: &[Vec<usize>], group_of: &[Option<usize>]) -> Vec<usize> {
    let edges = group_edges(deps, group_of, plans.len());
    let edge_lists: Vec<Vec<usize>> = edges
        .iter()
        .map(|targets| {
            let mut targets: Vec<usize> = targets.iter().copied().collect();
            targets.sort_unstable();
            targets
        })
        .collect();
    let order = dependency_order(&edge_lists, &HashSet::new());
    let (standalone, shared): (Vec<usize>, Vec<usize>) =
        order.into_iter().partition(|&g| plans[g].standalone);
    shared.into_iter().chain(standalone).collect()
}
