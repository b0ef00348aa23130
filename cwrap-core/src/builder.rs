//! Builds the final compiler command from the input invocation.

use crate::command::Command;
use crate::config::WrapperConfig;
use std::fmt;

/// Which compiler family the invocation targets. Chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilerFlavor {
    Gcc,
    Clang,
}

impl fmt::Display for CompilerFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcc => write!(f, "gcc"),
            Self::Clang => write!(f, "clang"),
        }
    }
}

/// Produce the command that actually runs for `base`.
///
/// The common flags and then the flavor's flags are placed ahead of the
/// original arguments. With the cache tool enabled, the cache tool becomes the
/// executable and the compiler path its first argument.
pub fn build_command(flavor: CompilerFlavor, base: &Command, cfg: &WrapperConfig) -> Command {
    let flavor_flags = match flavor {
        CompilerFlavor::Gcc => &cfg.gcc_flags,
        CompilerFlavor::Clang => &cfg.clang_flags,
    };

    let mut args = Vec::with_capacity(
        1 + cfg.common_flags.len() + flavor_flags.len() + base.args().len(),
    );
    let path = if cfg.use_cache_tool {
        args.push(base.path().to_string());
        cfg.cache_tool_path.to_string_lossy().into_owned()
    } else {
        base.path().to_string()
    };
    args.extend(cfg.common_flags.iter().cloned());
    args.extend(flavor_flags.iter().cloned());
    args.extend(base.args().iter().cloned());

    Command::new(path, args).with_env_updates(base.env_updates().iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn index_of(cmd: &Command, arg: &str) -> usize {
        cmd.args()
            .iter()
            .position(|a| a == arg)
            .unwrap_or_else(|| panic!("{} not in {:?}", arg, cmd))
    }

    #[test]
    fn test_common_flags_before_source() {
        let cfg = WrapperConfig::builder().common_flags(["-someflag"]).build();
        let base = Command::new("/usr/bin/x86_64-cros-linux-gnu-gcc", ["main.cc"]);

        let cmd = build_command(CompilerFlavor::Gcc, &base, &cfg);
        assert!(index_of(&cmd, "-someflag") < index_of(&cmd, "main.cc"));
        assert_eq!(cmd.path(), base.path());
    }

    #[test]
    fn test_flavor_flags_only_for_their_flavor() {
        let cfg = WrapperConfig::builder()
            .gcc_flags(["-gccflag"])
            .clang_flags(["-clangflag"])
            .build();
        let base = Command::new("/usr/bin/clang", ["main.cc"]);

        let clang = build_command(CompilerFlavor::Clang, &base, &cfg);
        assert_eq!(clang.args(), ["-clangflag", "main.cc"]);

        let gcc = build_command(CompilerFlavor::Gcc, &base, &cfg);
        assert_eq!(gcc.args(), ["-gccflag", "main.cc"]);
    }

    #[test]
    fn test_common_flags_precede_flavor_flags() {
        let cfg = WrapperConfig::builder()
            .common_flags(["-common"])
            .clang_flags(["-clangflag"])
            .build();
        let base = Command::new("/usr/bin/clang", ["-c", "main.cc"]);

        let cmd = build_command(CompilerFlavor::Clang, &base, &cfg);
        assert_eq!(cmd.args(), ["-common", "-clangflag", "-c", "main.cc"]);
    }

    #[test]
    fn test_cache_tool_fronts_compiler() {
        let cfg = WrapperConfig::builder()
            .use_cache_tool(true)
            .cache_tool_path("/usr/bin/ccache")
            .common_flags(["-common"])
            .build();
        let base = Command::new("/usr/bin/gcc", ["main.cc"]).with_env_updates(["A=1"]);

        let cmd = build_command(CompilerFlavor::Gcc, &base, &cfg);
        assert_eq!(cmd.path(), "/usr/bin/ccache");
        assert_eq!(cmd.args(), ["/usr/bin/gcc", "-common", "main.cc"]);
        assert_eq!(cmd.env_updates(), ["A=1"]);
    }

    proptest! {
        #[test]
        fn prop_configured_flags_keep_order_before_positional_args(
            common in prop::collection::vec("-c[a-z]{1,6}", 0..5),
            gcc in prop::collection::vec("-g[a-z]{1,6}", 0..5),
            clang in prop::collection::vec("-l[a-z]{1,6}", 0..5),
            positional in prop::collection::vec("[a-z]{1,8}\\.cc", 1..4),
            use_clang in any::<bool>(),
            use_cache_tool in any::<bool>(),
        ) {
            let cfg = WrapperConfig::builder()
                .common_flags(common.clone())
                .gcc_flags(gcc.clone())
                .clang_flags(clang.clone())
                .use_cache_tool(use_cache_tool)
                .build();
            let flavor = if use_clang { CompilerFlavor::Clang } else { CompilerFlavor::Gcc };
            let flavor_flags = if use_clang { &clang } else { &gcc };
            let base = Command::new("/usr/bin/cc", positional.clone());

            let cmd = build_command(flavor, &base, &cfg);
            let first_positional = cmd.args().iter().position(|a| *a == positional[0]).unwrap();
            let expected: Vec<&String> = common.iter().chain(flavor_flags.iter()).collect();

            // Every configured flag appears, in configured order, before the first positional.
            let mut cursor = 0;
            for flag in expected {
                let found = cmd.args()[cursor..].iter().position(|a| a == flag);
                prop_assert!(found.is_some(), "{} missing from {:?}", flag, cmd);
                let idx = cursor + found.unwrap();
                prop_assert!(idx < first_positional);
                cursor = idx + 1;
            }
            prop_assert_eq!(&cmd.args()[first_positional..], &positional[..]);
        }
    }
}
