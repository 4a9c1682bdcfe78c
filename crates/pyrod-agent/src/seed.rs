//! Built-in egg descriptors
//!
//! Seeded into an empty eggs directory on first startup so a fresh daemon
//! can host the common workloads without waiting for the control plane to
//! push descriptors.

use pyrod_egg::Egg;

/// The default descriptor set: Terraria and vanilla Minecraft
pub fn default_eggs() -> Vec<Egg> {
    vec![terraria(), minecraft_vanilla()]
}

fn terraria() -> Egg {
    serde_json::from_value(serde_json::json!({
        "id": "terraria",
        "name": "Terraria (Vanilla)",
        "description": "Vanilla Terraria dedicated server.",
        "author": "support@pyro.host",
        "docker_images": {
            "Debian": "debian:bookworm-slim"
        },
        "startup": "./TerrariaServer.bin.x86_64 -config serverconfig.txt -port {{SERVER_PORT}}",
        "config": {
            "files": {
                "serverconfig.txt": {
                    "parser": "properties",
                    "find": {
                        "worldpath": "/home/container/saves/Worlds",
                        "world": "/home/container/saves/Worlds/{{WORLD_NAME}}.wld",
                        "worldname": "{{WORLD_NAME}}",
                        "autocreate": "{{WORLD_SIZE}}",
                        "difficulty": "{{WORLD_DIFFICULTY}}",
                        "maxplayers": "{{MAX_PLAYERS}}",
                        "port": "{{SERVER_PORT}}",
                        "motd": "{{SERVER_MOTD}}",
                        "seed": "{{WORLD_SEED}}",
                        "password": "{{PASSWORD}}"
                    }
                }
            },
            "startup": { "done": "Type 'help' for a list of commands" },
            "stop": "exit"
        },
        "scripts": {
            "installation": {
                "script": "#!/bin/bash\napt-get update -qq && apt-get install -y -qq curl unzip > /dev/null\ncd /mnt/server\nDOWNLOAD_URL=$(curl -sSL https://terraria.org/api/get/dedicated-servers-names | grep -o '\"[^\"]*\"' | head -1 | tr -d '\"')\ncurl -sSL -o terraria.zip \"https://terraria.org/api/download/pc-dedicated-server/${DOWNLOAD_URL}\"\nunzip -qo terraria.zip\nVERSION_DIR=$(find . -maxdepth 1 -type d -name '1*' | head -1)\ncp -r \"${VERSION_DIR}/Linux/.\" .\nrm -rf terraria.zip \"${VERSION_DIR}\"\nchmod +x TerrariaServer.bin.x86_64\nmkdir -p saves/Worlds\necho 'install complete'\n",
                "container": "debian:bookworm-slim",
                "entrypoint": "bash"
            }
        },
        "variables": [
            {
                "name": "World Name",
                "env_variable": "WORLD_NAME",
                "default_value": "World",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|string|max:64"
            },
            {
                "name": "Max Players",
                "env_variable": "MAX_PLAYERS",
                "default_value": "8",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|numeric|between:1,255"
            },
            {
                "name": "World Size",
                "env_variable": "WORLD_SIZE",
                "default_value": "1",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|numeric|in:1,2,3"
            },
            {
                "name": "World Difficulty",
                "env_variable": "WORLD_DIFFICULTY",
                "default_value": "0",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|numeric|in:0,1,2,3"
            },
            {
                "name": "Message of the Day",
                "env_variable": "SERVER_MOTD",
                "default_value": "Welcome!",
                "user_viewable": true,
                "user_editable": true,
                "rules": "nullable|string|max:128"
            },
            {
                "name": "World Seed",
                "env_variable": "WORLD_SEED",
                "default_value": "",
                "user_viewable": true,
                "user_editable": true,
                "rules": "nullable|string"
            },
            {
                "name": "Server Password",
                "env_variable": "PASSWORD",
                "default_value": "",
                "user_viewable": true,
                "user_editable": true,
                "rules": "nullable|string|max:64"
            }
        ]
    }))
    .expect("built-in terraria egg is valid")
}

fn minecraft_vanilla() -> Egg {
    serde_json::from_value(serde_json::json!({
        "id": "minecraft-vanilla",
        "name": "Minecraft (Vanilla)",
        "description": "Mojang's vanilla Minecraft server.",
        "author": "support@pyro.host",
        "docker_images": {
            "Java 17": "eclipse-temurin:17-jre-jammy",
            "Java 21": "eclipse-temurin:21-jre-jammy"
        },
        "startup": "java -Xms128M -Xmx{{SERVER_MEMORY}}M -Dterminal.jline=false -Dterminal.ansi=true -jar {{SERVER_JARFILE}}",
        "config": {
            "files": {
                "server.properties": {
                    "parser": "properties",
                    "find": {
                        "server-port": "{{SERVER_PORT}}",
                        "query.port": "{{SERVER_PORT}}",
                        "motd": "{{MOTD}}",
                        "max-players": "{{MAX_PLAYERS}}",
                        "enable-rcon": "true",
                        "rcon.port": "{{RCON_PORT}}"
                    }
                },
                "eula.txt": {
                    "parser": "file",
                    "find": "eula=true\n"
                }
            },
            "startup": { "done": "Done (" },
            "stop": "stop"
        },
        "scripts": {
            "installation": {
                "script": "#!/bin/bash\napt-get update -qq && apt-get install -y -qq curl jq > /dev/null\ncd /mnt/server\nMANIFEST=https://launchermeta.mojang.com/mc/game/version_manifest.json\nif [ -z \"${VERSION}\" ] || [ \"${VERSION}\" = \"latest\" ]; then\n  VERSION=$(curl -sSL ${MANIFEST} | jq -r '.latest.release')\nfi\nVERSION_URL=$(curl -sSL ${MANIFEST} | jq -r --arg v \"${VERSION}\" '.versions[] | select(.id == $v) | .url')\nSERVER_URL=$(curl -sSL ${VERSION_URL} | jq -r '.downloads.server.url')\ncurl -sSL -o ${SERVER_JARFILE} ${SERVER_URL}\necho 'install complete'\n",
                "container": "debian:bookworm-slim",
                "entrypoint": "bash"
            }
        },
        "variables": [
            {
                "name": "Server Version",
                "env_variable": "VERSION",
                "default_value": "latest",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|string|max:20"
            },
            {
                "name": "Server Jar File",
                "env_variable": "SERVER_JARFILE",
                "default_value": "server.jar",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|string|max:64"
            },
            {
                "name": "Message of the Day",
                "env_variable": "MOTD",
                "default_value": "A Minecraft Server",
                "user_viewable": true,
                "user_editable": true,
                "rules": "nullable|string|max:128"
            },
            {
                "name": "Max Players",
                "env_variable": "MAX_PLAYERS",
                "default_value": "20",
                "user_viewable": true,
                "user_editable": true,
                "rules": "required|numeric|between:1,1000"
            },
            {
                "name": "RCON Port",
                "env_variable": "RCON_PORT",
                "default_value": "25575",
                "user_viewable": true,
                "user_editable": false,
                "rules": "required|numeric|between:1024,65535"
            }
        ]
    }))
    .expect("built-in minecraft egg is valid")
}
